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

//! Integration tests for the owning resource wrappers.

use quadra_core::math::{LinearRgba, Vec2, Vec3};
use quadra_core::platform::RenderWindowHandle;
use quadra_core::renderer::api::{
    GraphicsBackendType, RenderSettings, ResourceCounts, ShaderId, TargetClass, TextureDimension,
    TextureFlags, TextureFormat,
};
use quadra_core::renderer::{
    GraphicsContext, GraphicsContextFactory, GraphicsDevice, TextureError, ValidationError,
};
use quadra_core::Canvas;
use quadra_infra::SoftContextFactory;
use quadra_sdk::resources::{FrameBuffer, GpuBuffer, PixelImage, ShaderLibrary, Texture};
use quadra_sdk::MeshData;
use std::sync::Arc;

fn context_with(kind: GraphicsBackendType, budget: Option<u64>) -> Box<dyn GraphicsContext> {
    let window: RenderWindowHandle = Canvas::new(16, 16);
    let settings = RenderSettings {
        width: 16,
        height: 16,
        memory_budget_bytes: budget,
        ..RenderSettings::default()
    };
    SoftContextFactory.create(kind, window, &settings).unwrap()
}

fn context(kind: GraphicsBackendType) -> Box<dyn GraphicsContext> {
    context_with(kind, None)
}

fn counts(device: &Arc<dyn GraphicsDevice>) -> ResourceCounts {
    device.resource_counts()
}

fn checkerboard() -> PixelImage {
    let mut rgba = Vec::with_capacity(4 * 4 * 4);
    for y in 0..4 {
        for x in 0..4 {
            let v = if (x + y) % 2 == 0 { 255 } else { 0 };
            rgba.extend_from_slice(&[v, v, v, 255]);
        }
    }
    PixelImage::new(4, 4, rgba).unwrap()
}

#[test]
fn test_out_of_memory_vertex_upload_leaves_a_null_buffer() {
    let context = context_with(GraphicsBackendType::FenceBased, Some(1 << 20));
    let device = context.device();
    let shaders = ShaderLibrary::load_all(device.clone(), None).unwrap();
    let baseline = counts(&device);

    let positions: Vec<Vec3> = (0..40_000).map(|i| Vec3::new(i as f32, 0.0, 0.0)).collect();
    let mut buffer = GpuBuffer::new(device.clone());
    buffer.create_index(&[0, 1, 2]).unwrap();
    let err = buffer
        .create_vertex(&positions, &[], &[], &shaders)
        .unwrap_err();
    assert_eq!(err.code(), -2);
    assert!(buffer.is_null());
    assert_eq!(counts(&device), baseline);
}

#[test]
fn test_empty_vertex_data_is_not_valid_but_destroys_cleanly() {
    let context = context(GraphicsBackendType::Immediate);
    let device = context.device();
    let shaders = ShaderLibrary::load_all(device.clone(), None).unwrap();

    let mut buffer = GpuBuffer::new(device.clone());
    buffer.create_vertex(&[], &[], &[], &shaders).unwrap();
    assert!(!buffer.is_valid());
    assert!(!buffer.is_drawable());
    buffer.destroy();
    assert!(buffer.is_null());
}

#[test]
fn test_destroy_is_idempotent_and_returns_counts_to_baseline() {
    for kind in GraphicsBackendType::ALL {
        let context = context(kind);
        let device = context.device();
        let shaders = ShaderLibrary::load_all(device.clone(), None).unwrap();
        let baseline = counts(&device);

        let mut mesh = GpuBuffer::from_mesh(device.clone(), &MeshData::cube(1.0), &shaders).unwrap();
        assert!(mesh.is_drawable());
        assert_eq!(mesh.uniform_count(), ShaderId::ALL.len());
        if device.capabilities().bakes_pipelines {
            assert_eq!(
                mesh.pipeline_count(),
                ShaderId::ALL.len() * TargetClass::ALL.len()
            );
        } else {
            assert_eq!(mesh.pipeline_count(), 0);
        }

        let mut texture = Texture::from_pixels(
            device.clone(),
            "checker",
            &checkerboard(),
            TextureFlags::REPEAT | TextureFlags::MIPMAPS,
        )
        .unwrap();
        assert_ne!(counts(&device), baseline);

        mesh.destroy();
        mesh.destroy();
        texture.destroy();
        texture.destroy();
        assert!(!texture.is_valid());
        assert_eq!(counts(&device), baseline, "{kind}");
    }
}

#[test]
fn test_cubemap_needs_six_faces() {
    let context = context(GraphicsBackendType::CommandListV2);
    let device = context.device();
    let baseline = counts(&device);
    let faces = vec![PixelImage::solid(2, 2, [0, 0, 0, 255]); 4];
    let err = Texture::from_cubemap(device.clone(), "sky", &faces, TextureFlags::empty()).unwrap_err();
    assert!(matches!(err, TextureError::CubemapFaceCount(4)));
    assert_eq!(err.code(), -1);
    assert_eq!(counts(&device), baseline);

    let mut faces = vec![PixelImage::solid(2, 2, [0, 0, 0, 255]); 6];
    faces[3] = PixelImage::solid(4, 4, [0, 0, 0, 255]);
    let err = Texture::from_cubemap(device.clone(), "sky", &faces, TextureFlags::empty()).unwrap_err();
    assert_eq!(err.code(), -2);

    let faces = vec![PixelImage::solid(2, 2, [0, 0, 0, 255]); 6];
    let cube = Texture::from_cubemap(device, "sky", &faces, TextureFlags::MIPMAPS).unwrap();
    assert_eq!(cube.dimension(), TextureDimension::Cube);
    assert_eq!(cube.layers(), 6);
    assert_eq!(cube.mip_levels(), 1);
}

#[test]
fn test_mip_chain_of_a_checkerboard_ends_mid_grey() {
    for kind in GraphicsBackendType::ALL {
        let context = context(kind);
        let device = context.device();
        let texture =
            Texture::from_pixels(device.clone(), "checker", &checkerboard(), TextureFlags::MIPMAPS)
                .unwrap();
        assert_eq!(texture.mip_levels(), 3);
        let id = texture.id().unwrap();
        let last = device.read_texture(id, 0, 2).unwrap();
        assert_eq!(last.len(), 4);
        for channel in &last[..3] {
            assert!((126..=129).contains(channel), "{kind}: {last:?}");
        }
    }
}

#[test]
fn test_srgb_flag_selects_an_srgb_format() {
    let context = context(GraphicsBackendType::Immediate);
    let texture = Texture::from_pixels(
        context.device(),
        "albedo",
        &PixelImage::solid(2, 2, [128, 128, 128, 255]),
        TextureFlags::SRGB,
    )
    .unwrap();
    assert_eq!(texture.format(), TextureFormat::Rgba8UnormSrgb);
    assert_eq!(texture.mip_levels(), 1);
}

#[test]
fn test_decoding_garbage_fails() {
    let err = PixelImage::decode(b"definitely not an image").unwrap_err();
    assert_eq!(err.code(), -3);
    assert!(PixelImage::new(2, 2, vec![0; 3]).is_err());
}

#[test]
fn test_render_targets_own_their_depth_attachment() {
    let context = context(GraphicsBackendType::FenceBased);
    let device = context.device();
    let baseline = counts(&device);

    let mut target = FrameBuffer::color(device.clone(), "reflection", 8, 8).unwrap();
    assert!(target.is_valid());
    assert!(target.texture().depth_attachment().is_some());
    assert_eq!(counts(&device).textures, baseline.textures + 2);
    assert_eq!(counts(&device).framebuffers, baseline.framebuffers + 1);

    target.destroy();
    target.destroy();
    assert_eq!(counts(&device), baseline);
}

#[test]
fn test_shadow_arrays_have_a_layer_per_face() {
    let context = context(GraphicsBackendType::CommandListV1);
    let device = context.device();
    let cubes = FrameBuffer::depth_array(device.clone(), "points", 16, 2, TextureDimension::CubeArray)
        .unwrap();
    assert_eq!(cubes.texture().layers(), 12);
    assert_eq!(cubes.texture().format(), TextureFormat::Depth32Float);

    let atlas = FrameBuffer::depth_array(device.clone(), "atlas", 16, 3, TextureDimension::D2Array)
        .unwrap();
    assert_eq!(atlas.texture().layers(), 3);

    assert!(Texture::render_target_array(device, "bad", 16, 1, TextureDimension::D2).is_err());
}

#[test]
fn test_unmatched_bind_is_reported_at_present() {
    for kind in GraphicsBackendType::ALL {
        let mut context = context(kind);
        let device = context.device();
        let mut target = FrameBuffer::color(device, "offscreen", 8, 8).unwrap();

        context.begin_frame(LinearRgba::BLACK).unwrap();
        target.bind(context.as_mut(), 0, Some(LinearRgba::RED)).unwrap();
        assert_eq!(target.bound_layer(), Some(0));
        context.present().unwrap();
        let errors = context.take_validation_errors();
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, ValidationError::UnmatchedBind { layer: 0, .. })),
            "{kind}: {errors:?}"
        );

        context.begin_frame(LinearRgba::BLACK).unwrap();
        target.bind(context.as_mut(), 0, Some(LinearRgba::RED)).unwrap();
        target.unbind(context.as_mut()).unwrap();
        assert_eq!(target.bound_layer(), None);
        context.present().unwrap();
        assert!(context.take_validation_errors().is_empty(), "{kind}");
    }
}

#[test]
fn test_offscreen_uniform_slots_are_created_on_demand() {
    use quadra_core::renderer::api::{TargetKey, TargetKind};

    let context = context(GraphicsBackendType::CommandListV2);
    let device = context.device();
    let shaders = ShaderLibrary::load_all(device.clone(), None).unwrap();
    let data = MeshData {
        positions: vec![Vec3::ZERO, Vec3::X, Vec3::Y],
        normals: vec![Vec3::Z; 3],
        tex_coords: vec![Vec2::ZERO; 3],
        indices: vec![0, 1, 2],
    };
    let mut mesh = GpuBuffer::from_mesh(device, &data, &shaders).unwrap();
    let key = TargetKey::new(TargetKind::Shadow, 2);
    assert!(mesh.uniform(ShaderId::Depth, key).is_none());
    let first = mesh.ensure_uniform(ShaderId::Depth, key).unwrap();
    assert_eq!(mesh.ensure_uniform(ShaderId::Depth, key).unwrap(), first);
    assert_eq!(mesh.uniform_count(), ShaderId::ALL.len() + 1);
}
