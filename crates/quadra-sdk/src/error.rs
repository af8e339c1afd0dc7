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

//! Error types of the SDK.
//!
//! Creation failures keep the distinct negative codes callers used to receive, so
//! a host can still report "step N failed" while matching on typed variants.

use crate::scene::{MeshHandle, ObjectId, TextureHandle};
use quadra_core::renderer::api::{GraphicsBackendType, SettingsError, ShaderId, TargetKey};
use quadra_core::renderer::{RenderError, ResourceError, TextureError};
use thiserror::Error;

/// A failed step while building a [`GpuBuffer`](crate::resources::GpuBuffer).
///
/// Any of these leaves the buffer entirely null.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GpuBufferError {
    #[error("Index buffer creation failed: {0}")]
    IndexBuffer(ResourceError),

    #[error("Vertex buffer creation failed: {0}")]
    VertexBuffer(ResourceError),

    #[error("Uniform buffer creation failed for '{shader}': {source}")]
    Uniform {
        shader: ShaderId,
        source: ResourceError,
    },

    #[error("Pipeline creation failed for '{shader}': {source}")]
    Pipeline {
        shader: ShaderId,
        source: ResourceError,
    },
}

impl GpuBufferError {
    /// The result code of the failing step.
    pub fn code(&self) -> i32 {
        match self {
            GpuBufferError::IndexBuffer(_) => -1,
            GpuBufferError::VertexBuffer(_) => -2,
            GpuBufferError::Uniform { .. } => -3,
            GpuBufferError::Pipeline { .. } => -4,
        }
    }
}

/// A failed uniform update. Nothing is written when one of these is returned.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum UniformError {
    #[error("Mesh has no vertex buffer")]
    MissingVertexBuffer,

    #[error("Shader '{0}' has no compiled module")]
    MissingModule(ShaderId),

    #[error("Mesh has no uniform slot for '{shader}' on {target:?}")]
    MissingSlot { shader: ShaderId, target: TargetKey },

    #[error("No uniform payload could be built for '{0}'")]
    NullPayload(ShaderId),

    #[error("Uniform write failed: {0}")]
    Write(#[from] ResourceError),
}

impl UniformError {
    /// The result code of the failing step.
    pub fn code(&self) -> i32 {
        match self {
            UniformError::MissingVertexBuffer => -1,
            UniformError::MissingModule(_) => -2,
            UniformError::MissingSlot { .. } | UniformError::NullPayload(_) => -3,
            UniformError::Write(_) => -4,
        }
    }
}

/// Errors surfaced by the [`RenderEngine`](crate::RenderEngine).
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid render settings: {0}")]
    Settings(#[from] SettingsError),

    #[error("Render backend error: {0}")]
    Render(#[from] RenderError),

    #[error("GPU resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Mesh buffer error (code {code}): {0}", code = .0.code())]
    Buffer(#[from] GpuBufferError),

    #[error("Texture error (code {code}): {0}", code = .0.code())]
    Texture(#[from] TextureError),

    #[error("Uniform update error (code {code}): {0}", code = .0.code())]
    Uniform(#[from] UniformError),

    /// A backend switch failed and the previous backend was restored.
    #[error("Switching to {failed} failed ({reason}); restored {restored}")]
    SwitchFailed {
        failed: GraphicsBackendType,
        restored: GraphicsBackendType,
        reason: String,
    },

    /// A backend switch failed and the previous backend could not be restored either.
    #[error("Switching to {failed} failed ({reason}) and restoring {previous} failed too")]
    RestoreFailed {
        failed: GraphicsBackendType,
        previous: GraphicsBackendType,
        reason: String,
    },

    #[error("No active backend (the engine was shut down or a restore failed)")]
    NoBackend,

    #[error("Unknown mesh {0:?}")]
    UnknownMesh(MeshHandle),

    #[error("Mesh {0:?} is already attached to another object")]
    MeshInUse(MeshHandle),

    #[error("Unknown texture {0:?}")]
    UnknownTexture(TextureHandle),

    #[error("Unknown object {0:?}")]
    UnknownObject(ObjectId),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_codes_are_distinct() {
        let err = ResourceError::NotFound;
        let codes = [
            GpuBufferError::IndexBuffer(err.clone()).code(),
            GpuBufferError::VertexBuffer(err.clone()).code(),
            GpuBufferError::Uniform {
                shader: ShaderId::Color,
                source: err.clone(),
            }
            .code(),
            GpuBufferError::Pipeline {
                shader: ShaderId::Color,
                source: err,
            }
            .code(),
        ];
        assert_eq!(codes, [-1, -2, -3, -4]);
    }

    #[test]
    fn test_engine_error_reports_codes() {
        let err: EngineError = GpuBufferError::VertexBuffer(ResourceError::OutOfMemory {
            requested: 10,
            available: 2,
        })
        .into();
        assert!(err.to_string().starts_with("Mesh buffer error (code -2)"));

        let err = EngineError::SwitchFailed {
            failed: GraphicsBackendType::CommandListV2,
            restored: GraphicsBackendType::Immediate,
            reason: "no adapter".into(),
        };
        assert_eq!(
            err.to_string(),
            "Switching to CommandListV2 failed (no adapter); restored Immediate"
        );
    }
}
