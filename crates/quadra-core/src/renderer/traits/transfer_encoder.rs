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

use crate::renderer::api::{ImageState, TextureId};
use crate::renderer::error::ResourceError;

/// A one-shot transfer command stream used by the core to drive copies and blits
/// on explicit backends.
///
/// Commands are recorded and only executed by [`TransferEncoder::finish_and_wait`],
/// which submits them and blocks until the GPU has completed them.
pub trait TransferEncoder {
    /// Records a layout transition of one subresource.
    fn barrier(&mut self, texture: TextureId, layer: u32, mip: u32, from: ImageState, to: ImageState);

    /// Records a 2x2 box-filter downsample from `src_mip` into `src_mip + 1`.
    /// The source must be in `CopySrc`, the destination in `CopyDst`.
    fn blit_mip(&mut self, texture: TextureId, layer: u32, src_mip: u32);

    /// Submits the recorded commands and waits for them.
    fn finish_and_wait(self: Box<Self>) -> Result<(), ResourceError>;
}
