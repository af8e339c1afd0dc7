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

//! Mip chain generation shared by every backend.

use crate::renderer::api::{ImageState, TextureId};
use crate::renderer::error::ResourceError;
use crate::renderer::traits::GraphicsDevice;

/// Fills levels `1..mip_levels` of every layer of `texture` from level 0.
///
/// Backends that can generate mips themselves do so in one call. Elsewhere the
/// chain is recorded as explicit transfers: each level is moved to `CopySrc`, the
/// next one is box-filtered from it and the source is then left readable. The last
/// level goes straight from `CopyDst` to `ShaderRead`. The call blocks until the
/// transfer has executed.
///
/// The texture must have been created with all levels in `CopyDst`.
pub fn generate_mip_chain(
    device: &dyn GraphicsDevice,
    texture: TextureId,
    mip_levels: u32,
    layers: u32,
) -> Result<(), ResourceError> {
    if mip_levels <= 1 {
        return Ok(());
    }
    if device.capabilities().device_mipmaps {
        return device.generate_mipmaps(texture);
    }

    let mut encoder = device.begin_transfer()?;
    for layer in 0..layers {
        for mip in 0..mip_levels - 1 {
            encoder.barrier(texture, layer, mip, ImageState::CopyDst, ImageState::CopySrc);
            encoder.blit_mip(texture, layer, mip);
            encoder.barrier(texture, layer, mip, ImageState::CopySrc, ImageState::ShaderRead);
        }
        encoder.barrier(
            texture,
            layer,
            mip_levels - 1,
            ImageState::CopyDst,
            ImageState::ShaderRead,
        );
    }
    log::debug!("Recorded mip chain for {texture:?}: {mip_levels} levels x {layers} layers");
    encoder.finish_and_wait()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::api::*;
    use crate::renderer::traits::TransferEncoder;
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Barrier(u32, u32, ImageState, ImageState),
        Blit(u32, u32),
        Finish,
        DeviceMips,
    }

    #[derive(Debug)]
    struct RecordingDevice {
        kind: GraphicsBackendType,
        ops: Mutex<Vec<Op>>,
    }

    struct RecordingEncoder<'a> {
        ops: &'a Mutex<Vec<Op>>,
    }

    impl TransferEncoder for RecordingEncoder<'_> {
        fn barrier(&mut self, _: TextureId, layer: u32, mip: u32, from: ImageState, to: ImageState) {
            self.ops.lock().unwrap().push(Op::Barrier(layer, mip, from, to));
        }

        fn blit_mip(&mut self, _: TextureId, layer: u32, src_mip: u32) {
            self.ops.lock().unwrap().push(Op::Blit(layer, src_mip));
        }

        fn finish_and_wait(self: Box<Self>) -> Result<(), ResourceError> {
            self.ops.lock().unwrap().push(Op::Finish);
            Ok(())
        }
    }

    fn unsupported<T>() -> Result<T, ResourceError> {
        Err(ResourceError::Unsupported("recording device".into()))
    }

    impl GraphicsDevice for RecordingDevice {
        fn create_shader_module(&self, _: &ShaderModuleDescriptor) -> Result<ShaderModuleId, ResourceError> {
            unsupported()
        }
        fn destroy_shader_module(&self, _: ShaderModuleId) -> Result<(), ResourceError> {
            unsupported()
        }
        fn create_render_pipeline(&self, _: &PipelineDescriptor) -> Result<PipelineId, ResourceError> {
            unsupported()
        }
        fn destroy_render_pipeline(&self, _: PipelineId) -> Result<(), ResourceError> {
            unsupported()
        }
        fn create_buffer(&self, _: &BufferDescriptor) -> Result<BufferId, ResourceError> {
            unsupported()
        }
        fn create_buffer_with_data(&self, _: &BufferDescriptor, _: &[u8]) -> Result<BufferId, ResourceError> {
            unsupported()
        }
        fn write_buffer(&self, _: BufferId, _: u64, _: &[u8]) -> Result<(), ResourceError> {
            unsupported()
        }
        fn destroy_buffer(&self, _: BufferId) -> Result<(), ResourceError> {
            unsupported()
        }
        fn create_texture(&self, _: &TextureDescriptor, _: Option<&[u8]>) -> Result<TextureId, ResourceError> {
            unsupported()
        }
        fn destroy_texture(&self, _: TextureId) -> Result<(), ResourceError> {
            unsupported()
        }
        fn create_sampler(&self, _: &SamplerDescriptor) -> Result<SamplerId, ResourceError> {
            unsupported()
        }
        fn destroy_sampler(&self, _: SamplerId) -> Result<(), ResourceError> {
            unsupported()
        }
        fn create_framebuffer(&self, _: &FramebufferDescriptor) -> Result<FramebufferId, ResourceError> {
            unsupported()
        }
        fn destroy_framebuffer(&self, _: FramebufferId) -> Result<(), ResourceError> {
            unsupported()
        }
        fn generate_mipmaps(&self, _: TextureId) -> Result<(), ResourceError> {
            self.ops.lock().unwrap().push(Op::DeviceMips);
            Ok(())
        }
        fn begin_transfer(&self) -> Result<Box<dyn TransferEncoder + '_>, ResourceError> {
            Ok(Box::new(RecordingEncoder { ops: &self.ops }))
        }
        fn read_texture(&self, _: TextureId, _: u32, _: u32) -> Result<Vec<u8>, ResourceError> {
            unsupported()
        }
        fn resource_counts(&self) -> ResourceCounts {
            ResourceCounts::default()
        }
        fn capabilities(&self) -> BackendCapabilities {
            self.kind.capabilities()
        }
        fn adapter_info(&self) -> GraphicsAdapterInfo {
            GraphicsAdapterInfo {
                vendor: "test".into(),
                renderer: "recording".into(),
                api_version: "0".into(),
                backend_type: self.kind,
            }
        }
        fn frames_in_flight(&self) -> usize {
            1
        }
    }

    fn device(kind: GraphicsBackendType) -> RecordingDevice {
        RecordingDevice {
            kind,
            ops: Mutex::new(Vec::new()),
        }
    }

    #[test]
    fn test_explicit_backends_record_barrier_blit_barrier() {
        let device = device(GraphicsBackendType::FenceBased);
        generate_mip_chain(&device, TextureId(1), 3, 1).unwrap();
        use ImageState::*;
        assert_eq!(
            *device.ops.lock().unwrap(),
            vec![
                Op::Barrier(0, 0, CopyDst, CopySrc),
                Op::Blit(0, 0),
                Op::Barrier(0, 0, CopySrc, ShaderRead),
                Op::Barrier(0, 1, CopyDst, CopySrc),
                Op::Blit(0, 1),
                Op::Barrier(0, 1, CopySrc, ShaderRead),
                Op::Barrier(0, 2, CopyDst, ShaderRead),
                Op::Finish,
            ]
        );
    }

    #[test]
    fn test_immediate_backend_uses_device_mipmaps() {
        let device = device(GraphicsBackendType::Immediate);
        generate_mip_chain(&device, TextureId(1), 5, 1).unwrap();
        assert_eq!(*device.ops.lock().unwrap(), vec![Op::DeviceMips]);
    }

    #[test]
    fn test_single_level_is_a_no_op() {
        let device = device(GraphicsBackendType::CommandListV2);
        generate_mip_chain(&device, TextureId(1), 1, 6).unwrap();
        assert!(device.ops.lock().unwrap().is_empty());
    }
}
