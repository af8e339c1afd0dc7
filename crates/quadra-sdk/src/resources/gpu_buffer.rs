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

use super::shader::ShaderLibrary;
use crate::error::GpuBufferError;
use crate::scene::MeshData;
use quadra_core::math::{Vec2, Vec3};
use quadra_core::renderer::api::{
    interleave_vertices, uniform_layout, BufferDescriptor, BufferId, BufferUsage,
    PipelineDescriptor, PipelineId, RasterState, ShaderId, TargetClass, TargetKey, VERTEX_STRIDE,
};
use quadra_core::renderer::GraphicsDevice;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

/// The GPU side of one mesh: vertex and index buffers, the pipelines baked for its
/// vertex layout and one uniform buffer per (shader, target) it is drawn with.
///
/// A buffer is either fully initialized or entirely null: a failed creation step
/// releases everything created so far before returning its error.
#[derive(Debug)]
pub struct GpuBuffer {
    device: Arc<dyn GraphicsDevice>,
    vertex: Option<BufferId>,
    index: Option<BufferId>,
    vertex_count: u32,
    index_count: u32,
    pipelines: HashMap<(ShaderId, TargetClass), PipelineId>,
    uniforms: HashMap<(ShaderId, TargetKey), BufferId>,
}

impl GpuBuffer {
    /// A null buffer bound to `device`.
    pub fn new(device: Arc<dyn GraphicsDevice>) -> Self {
        Self {
            device,
            vertex: None,
            index: None,
            vertex_count: 0,
            index_count: 0,
            pipelines: HashMap::new(),
            uniforms: HashMap::new(),
        }
    }

    /// Builds every buffer of a mesh, with screen uniform slots for the loaded shaders.
    pub fn from_mesh(
        device: Arc<dyn GraphicsDevice>,
        data: &MeshData,
        shaders: &ShaderLibrary,
    ) -> Result<Self, GpuBufferError> {
        let mut buffer = Self::new(device);
        buffer.create_index(&data.indices)?;
        buffer.create_vertex(&data.positions, &data.normals, &data.tex_coords, shaders)?;
        let ids: Vec<ShaderId> = shaders.ids().collect();
        buffer.create_uniform(&ids)?;
        Ok(buffer)
    }

    /// Uploads the index buffer.
    pub fn create_index(&mut self, indices: &[u32]) -> Result<(), GpuBufferError> {
        if let Some(old) = self.index.take() {
            self.release_buffer(old);
        }
        self.index_count = 0;
        if indices.is_empty() {
            return Ok(());
        }
        let result = self.device.create_buffer_with_data(
            &BufferDescriptor {
                label: Some(Cow::Borrowed("mesh indices")),
                size: std::mem::size_of_val(indices) as u64,
                usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
            },
            bytemuck::cast_slice(indices),
        );
        match result {
            Ok(id) => {
                self.index = Some(id);
                self.index_count = indices.len() as u32;
                Ok(())
            }
            Err(err) => Err(self.fail(GpuBufferError::IndexBuffer(err))),
        }
    }

    /// Interleaves and uploads the vertex streams.
    ///
    /// On backends that bake pipelines, one pipeline is baked per loaded shader and
    /// target class, since the vertex layout is part of a pipeline's identity. An
    /// empty position stream leaves the buffer null.
    pub fn create_vertex(
        &mut self,
        vertices: &[Vec3],
        normals: &[Vec3],
        tex_coords: &[Vec2],
        shaders: &ShaderLibrary,
    ) -> Result<(), GpuBufferError> {
        if let Some(old) = self.vertex.take() {
            self.release_buffer(old);
        }
        self.release_pipelines();
        self.vertex_count = 0;
        if vertices.is_empty() {
            return Ok(());
        }

        let interleaved = interleave_vertices(vertices, normals, tex_coords);
        let result = self.device.create_buffer_with_data(
            &BufferDescriptor {
                label: Some(Cow::Borrowed("mesh vertices")),
                size: std::mem::size_of_val(interleaved.as_slice()) as u64,
                usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
            },
            bytemuck::cast_slice(&interleaved),
        );
        match result {
            Ok(id) => {
                self.vertex = Some(id);
                self.vertex_count = interleaved.len() as u32;
            }
            Err(err) => return Err(self.fail(GpuBufferError::VertexBuffer(err))),
        }

        if self.device.capabilities().bakes_pipelines {
            for program in shaders.programs() {
                let Some(module) = program.module() else {
                    continue;
                };
                for target in TargetClass::ALL {
                    let result = self.device.create_render_pipeline(&PipelineDescriptor {
                        label: Some(Cow::Owned(format!("{} {target:?}", program.id()))),
                        shader: program.id(),
                        module,
                        target,
                        vertex_stride: VERTEX_STRIDE,
                        state: RasterState::for_shader(program.id()),
                    });
                    match result {
                        Ok(id) => {
                            self.pipelines.insert((program.id(), target), id);
                        }
                        Err(source) => {
                            let shader = program.id();
                            return Err(self.fail(GpuBufferError::Pipeline { shader, source }));
                        }
                    }
                }
            }
            log::trace!(
                "GpuBuffer: Baked {} pipelines for a {}-vertex mesh",
                self.pipelines.len(),
                self.vertex_count
            );
        }
        Ok(())
    }

    /// Creates the screen uniform slot of every shader in `shaders`.
    pub fn create_uniform(&mut self, shaders: &[ShaderId]) -> Result<(), GpuBufferError> {
        for &shader in shaders {
            if let Err(err) = self.ensure_uniform(shader, TargetKey::SCREEN) {
                return Err(self.fail(err));
            }
        }
        Ok(())
    }

    /// Returns the uniform slot of `(shader, target)`, creating it on first use.
    ///
    /// A slot that fails to allocate is reported without touching existing slots.
    pub fn ensure_uniform(
        &mut self,
        shader: ShaderId,
        target: TargetKey,
    ) -> Result<BufferId, GpuBufferError> {
        if let Some(id) = self.uniforms.get(&(shader, target)) {
            return Ok(*id);
        }
        let id = self
            .device
            .create_buffer(&BufferDescriptor {
                label: Some(Cow::Owned(format!("{shader} uniforms {target:?}"))),
                size: uniform_layout(shader).size as u64,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            })
            .map_err(|source| GpuBufferError::Uniform { shader, source })?;
        self.uniforms.insert((shader, target), id);
        Ok(id)
    }

    /// Whether the vertex buffer exists.
    pub fn is_valid(&self) -> bool {
        self.vertex.is_some()
    }

    /// Whether the mesh has everything an indexed draw needs.
    pub fn is_drawable(&self) -> bool {
        self.vertex.is_some() && self.index.is_some() && self.index_count > 0
    }

    pub fn vertex_buffer(&self) -> Option<BufferId> {
        self.vertex
    }

    pub fn index_buffer(&self) -> Option<BufferId> {
        self.index
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// The pipeline baked for `shader` on `target`, on backends that bake pipelines.
    pub fn pipeline(&self, shader: ShaderId, target: TargetClass) -> Option<PipelineId> {
        self.pipelines.get(&(shader, target)).copied()
    }

    pub fn pipeline_count(&self) -> usize {
        self.pipelines.len()
    }

    /// The uniform slot of `(shader, target)`, if it exists.
    pub fn uniform(&self, shader: ShaderId, target: TargetKey) -> Option<BufferId> {
        self.uniforms.get(&(shader, target)).copied()
    }

    pub fn uniform_count(&self) -> usize {
        self.uniforms.len()
    }

    /// Whether every handle is null.
    pub fn is_null(&self) -> bool {
        self.vertex.is_none()
            && self.index.is_none()
            && self.pipelines.is_empty()
            && self.uniforms.is_empty()
    }

    /// Releases every backend handle. Idempotent.
    pub fn destroy(&mut self) {
        self.release_pipelines();
        for (_, id) in std::mem::take(&mut self.uniforms) {
            self.release_buffer(id);
        }
        if let Some(id) = self.vertex.take() {
            self.release_buffer(id);
        }
        if let Some(id) = self.index.take() {
            self.release_buffer(id);
        }
        self.vertex_count = 0;
        self.index_count = 0;
    }

    fn fail(&mut self, err: GpuBufferError) -> GpuBufferError {
        log::debug!("GpuBuffer: {err}; releasing the partial mesh");
        self.destroy();
        err
    }

    fn release_pipelines(&mut self) {
        for (_, id) in std::mem::take(&mut self.pipelines) {
            if let Err(e) = self.device.destroy_render_pipeline(id) {
                log::warn!("GpuBuffer: Failed to destroy pipeline {id:?}: {e}");
            }
        }
    }

    fn release_buffer(&self, id: BufferId) {
        if let Err(e) = self.device.destroy_buffer(id) {
            log::warn!("GpuBuffer: Failed to destroy buffer {id:?}: {e}");
        }
    }
}

impl Drop for GpuBuffer {
    fn drop(&mut self) {
        self.destroy();
    }
}
