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

//! Defines the hierarchy of error types for the rendering subsystem.

use crate::renderer::api::{
    FramebufferId, ImageState, PipelineId, ShaderId, ShaderModuleId, TargetClass, TextureId,
};
use std::fmt;

/// An error related to the loading or compilation of a shader module.
#[derive(Debug, Clone, PartialEq)]
pub enum ShaderError {
    /// An error occurred while trying to load the shader source from a path.
    LoadError {
        /// The path of the file that failed to load.
        path: String,
        /// The underlying I/O or source error.
        source_error: String,
    },
    /// The shader source failed to compile into a backend-specific module.
    CompilationError {
        /// A descriptive label for the shader.
        label: String,
        /// Detailed error messages from the compiler.
        details: String,
    },
    /// The requested shader module could not be found.
    NotFound {
        /// The ID of the shader module that was not found.
        id: ShaderModuleId,
    },
    /// A uniform payload does not match the canonical schema of its shader.
    LayoutMismatch {
        /// The shader whose schema was violated.
        shader: ShaderId,
        /// What went wrong.
        details: String,
    },
}

impl fmt::Display for ShaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShaderError::LoadError { path, source_error } => {
                write!(
                    f,
                    "Failed to load shader source from '{path}': {source_error}"
                )
            }
            ShaderError::CompilationError { label, details } => {
                write!(f, "Shader compilation failed for '{label}': {details}")
            }
            ShaderError::NotFound { id } => {
                write!(f, "Shader module not found for ID: {id:?}")
            }
            ShaderError::LayoutMismatch { shader, details } => {
                write!(f, "Uniform layout mismatch for shader '{shader}': {details}")
            }
        }
    }
}

impl std::error::Error for ShaderError {}

/// An error related to the creation or use of a pipeline object.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineError {
    /// The backend failed to bake the pipeline state object.
    CompilationFailed {
        /// A descriptive label for the pipeline, if available.
        label: Option<String>,
        /// Detailed error messages from the backend.
        details: String,
    },
    /// A shader module provided for the pipeline was invalid or missing.
    InvalidShaderModuleForPipeline {
        /// The ID of the invalid shader module.
        id: ShaderModuleId,
    },
    /// The specified pipeline ID is not valid.
    InvalidRenderPipeline {
        /// The ID of the invalid pipeline.
        id: PipelineId,
    },
    /// A draw was issued without the baked pipeline this backend requires.
    MissingPipeline {
        /// The shader of the draw.
        shader: ShaderId,
        /// The class of the bound target.
        target: TargetClass,
    },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::CompilationFailed { label, details } => {
                write!(
                    f,
                    "Pipeline compilation failed for '{}': {}",
                    label.as_deref().unwrap_or("Unknown"),
                    details
                )
            }
            PipelineError::InvalidShaderModuleForPipeline { id } => {
                write!(f, "Invalid shader module {id:?} for pipeline")
            }
            PipelineError::InvalidRenderPipeline { id } => {
                write!(f, "Invalid render pipeline ID: {id:?}")
            }
            PipelineError::MissingPipeline { shader, target } => {
                write!(f, "No baked pipeline for shader '{shader}' and target {target:?}")
            }
        }
    }
}

impl std::error::Error for PipelineError {}

/// An error related to the creation or use of a GPU resource (buffers, textures, etc.).
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceError {
    /// A shader-specific error occurred.
    Shader(ShaderError),
    /// A pipeline-specific error occurred.
    Pipeline(PipelineError),
    /// A generic resource could not be found.
    NotFound,
    /// The handle or ID used to reference a resource is invalid or stale.
    InvalidHandle,
    /// An error originating from the specific graphics backend implementation.
    BackendError(String),
    /// An attempt was made to access a resource out of its bounds.
    OutOfBounds,
    /// The allocation would exceed the device memory budget.
    OutOfMemory {
        /// Bytes requested by the failing allocation.
        requested: u64,
        /// Bytes still available when the allocation was attempted.
        available: u64,
    },
    /// The operation or format is not supported by this backend.
    Unsupported(String),
    /// The descriptor passed to a creation call is malformed.
    InvalidDescriptor(String),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::Shader(err) => write!(f, "Shader resource error: {err}"),
            ResourceError::Pipeline(err) => write!(f, "Pipeline resource error: {err}"),
            ResourceError::NotFound => write!(f, "Resource not found with ID."),
            ResourceError::InvalidHandle => write!(f, "Invalid resource handle or ID."),
            ResourceError::BackendError(msg) => {
                write!(f, "Backend-specific resource error: {msg}")
            }
            ResourceError::OutOfBounds => write!(f, "Resource access out of bounds."),
            ResourceError::OutOfMemory {
                requested,
                available,
            } => write!(
                f,
                "Out of device memory: requested {requested} bytes, {available} available."
            ),
            ResourceError::Unsupported(msg) => write!(f, "Unsupported operation: {msg}"),
            ResourceError::InvalidDescriptor(msg) => write!(f, "Invalid descriptor: {msg}"),
        }
    }
}

impl std::error::Error for ResourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResourceError::Shader(err) => Some(err),
            ResourceError::Pipeline(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ShaderError> for ResourceError {
    fn from(err: ShaderError) -> Self {
        ResourceError::Shader(err)
    }
}

impl From<PipelineError> for ResourceError {
    fn from(err: PipelineError) -> Self {
        ResourceError::Pipeline(err)
    }
}

/// An error raised while building a sampled texture.
#[derive(Debug, Clone, PartialEq)]
pub enum TextureError {
    /// Cubemaps require exactly six face images.
    CubemapFaceCount(usize),
    /// The pixel data does not match the declared size or the faces differ in size.
    InvalidDimensions {
        /// Expected byte length.
        expected: usize,
        /// Actual byte length.
        actual: usize,
    },
    /// The pixel source could not be decoded.
    Decode(String),
    /// The backend failed to create one of the texture objects.
    Resource(ResourceError),
}

impl TextureError {
    /// The negative result code reported to callers for this failure.
    pub fn code(&self) -> i32 {
        match self {
            TextureError::CubemapFaceCount(_) => -1,
            TextureError::InvalidDimensions { .. } => -2,
            TextureError::Decode(_) => -3,
            TextureError::Resource(_) => -4,
        }
    }
}

impl fmt::Display for TextureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TextureError::CubemapFaceCount(n) => {
                write!(f, "A cubemap needs exactly 6 face images, got {n}")
            }
            TextureError::InvalidDimensions { expected, actual } => {
                write!(f, "Pixel data has {actual} bytes, expected {expected}")
            }
            TextureError::Decode(msg) => write!(f, "Failed to decode pixel source: {msg}"),
            TextureError::Resource(err) => write!(f, "Texture resource error: {err}"),
        }
    }
}

impl std::error::Error for TextureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TextureError::Resource(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ResourceError> for TextureError {
    fn from(err: ResourceError) -> Self {
        TextureError::Resource(err)
    }
}

/// A contract violation detected by a backend while recording or executing work.
///
/// These are collected per frame and surfaced through the frame report instead of
/// being silently tolerated.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// A framebuffer was still bound when the frame was presented.
    UnmatchedBind {
        /// The framebuffer left bound.
        framebuffer: FramebufferId,
        /// The bound layer.
        layer: u32,
    },
    /// `unbind` was called with no framebuffer bound.
    UnbindWithoutBind,
    /// A texture was sampled while one of its layers was bound for writing.
    ReadWhileWritable {
        /// The texture that formed the feedback loop.
        texture: TextureId,
        /// The offending layer.
        layer: u32,
    },
    /// A render target was sampled before any pass wrote it this frame.
    StaleRead {
        /// The stale render target.
        texture: TextureId,
    },
    /// A barrier's source state did not match the tracked state of the subresource.
    InvalidStateTransition {
        /// The transitioned texture.
        texture: TextureId,
        /// Array layer.
        layer: u32,
        /// Mip level.
        mip: u32,
        /// The state the barrier declared.
        expected: ImageState,
        /// The state the subresource was actually in.
        actual: ImageState,
    },
    /// A baked pipeline was used with a target of a different class.
    PipelineTargetMismatch {
        /// The shader being drawn.
        shader: ShaderId,
        /// The class the pipeline was baked for.
        pipeline: TargetClass,
        /// The class of the bound target.
        target: TargetClass,
    },
    /// A submission waited on a semaphore nobody signaled.
    SemaphoreNotSignaled,
    /// A recorded draw referenced a descriptor that was reset before execution.
    DescriptorReleased {
        /// The frame slot whose descriptors were reused.
        slot: usize,
    },
    /// A draw was recorded outside of any render pass.
    DrawOutsidePass,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::UnmatchedBind { framebuffer, layer } => write!(
                f,
                "Framebuffer {framebuffer:?} (layer {layer}) was bound but never unbound"
            ),
            ValidationError::UnbindWithoutBind => write!(f, "Unbind called with no bound target"),
            ValidationError::ReadWhileWritable { texture, layer } => write!(
                f,
                "Texture {texture:?} layer {layer} sampled while bound for writing"
            ),
            ValidationError::StaleRead { texture } => write!(
                f,
                "Render target {texture:?} sampled before being written this frame"
            ),
            ValidationError::InvalidStateTransition {
                texture,
                layer,
                mip,
                expected,
                actual,
            } => write!(
                f,
                "Barrier on {texture:?} (layer {layer}, mip {mip}) expected {expected:?} but found {actual:?}"
            ),
            ValidationError::PipelineTargetMismatch {
                shader,
                pipeline,
                target,
            } => write!(
                f,
                "Pipeline for '{shader}' baked for {pipeline:?} used on a {target:?} target"
            ),
            ValidationError::SemaphoreNotSignaled => {
                write!(f, "Submission waited on an unsignaled semaphore")
            }
            ValidationError::DescriptorReleased { slot } => write!(
                f,
                "Descriptors of frame slot {slot} were reused before the GPU consumed them"
            ),
            ValidationError::DrawOutsidePass => write!(f, "Draw recorded outside of a render pass"),
        }
    }
}

impl std::error::Error for ValidationError {}

/// A high-level error raised by a graphics context.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderError {
    /// An operation was attempted before the context reached the `Ready` state.
    NotInitialized,
    /// A failure occurred during the initialization of the graphics backend.
    InitializationFailed(String),
    /// Failed to acquire the next image from the swapchain.
    SurfaceAcquisitionFailed(String),
    /// The surface no longer matches the swapchain and must be rebuilt.
    SurfaceOutOfDate,
    /// A critical rendering operation failed.
    RenderingFailed(String),
    /// An error occurred while managing a GPU resource.
    ResourceError(ResourceError),
    /// A bounded wait on a fence expired.
    Timeout {
        /// The bound that expired, in milliseconds.
        millis: u64,
    },
    /// The graphics device was lost and the context must be recreated.
    DeviceLost,
    /// An unexpected or internal error occurred.
    Internal(String),
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::NotInitialized => {
                write!(f, "The rendering context is not initialized.")
            }
            RenderError::InitializationFailed(msg) => {
                write!(f, "Failed to initialize graphics backend: {msg}")
            }
            RenderError::SurfaceAcquisitionFailed(msg) => {
                write!(f, "Failed to acquire surface for rendering: {msg}")
            }
            RenderError::SurfaceOutOfDate => write!(f, "The surface is out of date."),
            RenderError::RenderingFailed(msg) => {
                write!(f, "A critical rendering operation failed: {msg}")
            }
            RenderError::ResourceError(err) => {
                write!(f, "Graphics resource operation failed: {err}")
            }
            RenderError::Timeout { millis } => {
                write!(f, "Timed out after {millis} ms waiting for the GPU.")
            }
            RenderError::DeviceLost => write!(
                f,
                "The graphics device was lost and needs to be reinitialized."
            ),
            RenderError::Internal(msg) => {
                write!(f, "An internal or unexpected error occurred: {msg}")
            }
        }
    }
}

impl std::error::Error for RenderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RenderError::ResourceError(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ResourceError> for RenderError {
    fn from(err: ResourceError) -> Self {
        RenderError::ResourceError(err)
    }
}
