// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Defines data structures related to GPU buffer resources and the vertex layout.

use crate::math::{Vec2, Vec3};
use bitflags::bitflags;
use std::borrow::Cow;

bitflags! {
    /// A set of flags describing the allowed usages of a [`BufferId`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// The buffer can be used as the source of a copy operation.
        const COPY_SRC = 1 << 0;
        /// The buffer can be used as the destination of a copy operation.
        const COPY_DST = 1 << 1;
        /// The buffer can be bound as a vertex buffer.
        const VERTEX = 1 << 2;
        /// The buffer can be bound as an index buffer.
        const INDEX = 1 << 3;
        /// The buffer can be bound as a uniform buffer.
        ///
        /// On backends with frames in flight, uniform buffers are allocated with one
        /// copy per frame slot and writes land in the current slot.
        const UNIFORM = 1 << 4;
    }
}

/// A descriptor used to create a [`BufferId`].
#[derive(Debug, Clone)]
pub struct BufferDescriptor<'a> {
    /// An optional debug label for the buffer.
    pub label: Option<Cow<'a, str>>,
    /// The size of the buffer in bytes (of one frame copy for uniform buffers).
    pub size: u64,
    /// How the buffer will be used.
    pub usage: BufferUsage,
}

/// An opaque handle to a GPU buffer resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub u64);

/// One interleaved vertex as uploaded to vertex buffers.
#[derive(Debug, Clone, Copy, PartialEq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct Vertex {
    /// Object-space position.
    pub position: [f32; 3],
    /// Object-space normal.
    pub normal: [f32; 3],
    /// Texture coordinate.
    pub uv: [f32; 2],
}

/// Byte distance between consecutive vertices.
pub const VERTEX_STRIDE: u32 = std::mem::size_of::<Vertex>() as u32;

/// Interleaves separate attribute streams into [`Vertex`] records.
///
/// Missing normals or texture coordinates are filled with zeros; the position
/// stream decides the vertex count.
pub fn interleave_vertices(positions: &[Vec3], normals: &[Vec3], tex_coords: &[Vec2]) -> Vec<Vertex> {
    positions
        .iter()
        .enumerate()
        .map(|(i, p)| {
            let n = normals.get(i).copied().unwrap_or(Vec3::ZERO);
            let t = tex_coords.get(i).copied().unwrap_or(Vec2::ZERO);
            Vertex {
                position: [p.x, p.y, p.z],
                normal: [n.x, n.y, n.z],
                uv: [t.x, t.y],
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vertex_stride_matches_interleaved_layout() {
        assert_eq!(VERTEX_STRIDE, 32);
    }

    #[test]
    fn test_interleave_pads_missing_streams() {
        let out = interleave_vertices(
            &[Vec3::new(1.0, 2.0, 3.0), Vec3::ONE],
            &[Vec3::Y],
            &[],
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].normal, [0.0, 1.0, 0.0]);
        assert_eq!(out[1].normal, [0.0; 3]);
        assert_eq!(out[1].uv, [0.0; 2]);
    }
}
