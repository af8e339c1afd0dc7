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

//! Owning wrappers around backend resources.
//!
//! Every wrapper holds the device it was created on and releases its handles
//! exactly once, either through `destroy()` or on drop.

mod framebuffer;
mod gpu_buffer;
mod shader;
mod texture;

pub use self::framebuffer::FrameBuffer;
pub use self::gpu_buffer::GpuBuffer;
pub use self::shader::{FrameUniforms, ObjectUniforms, ShaderExtras, ShaderLibrary, ShaderProgram};
pub use self::texture::{PixelImage, Texture};
