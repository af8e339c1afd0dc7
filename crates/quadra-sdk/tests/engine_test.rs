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

//! Integration tests for the render engine facade, run against every backend.

use quadra_core::math::{LinearRgba, Mat4, Vec3};
use quadra_core::platform::RenderWindowHandle;
use quadra_core::renderer::api::{
    BackendSelectionConfig, Camera, ClipVolume, GraphicsBackendType, Light, RenderSettings,
    TextureFlags,
};
use quadra_core::renderer::{
    GraphicsContext, GraphicsContextFactory, RenderError, TextureError, ValidationError,
};
use quadra_core::Canvas;
use quadra_infra::{DefaultContextFactory, SoftContextFactory};
use quadra_sdk::resources::PixelImage;
use quadra_sdk::{
    DrawMode, EngineError, Material, MeshComponent, MeshData, RenderComponent, RenderEngine,
    SkyboxComponent, TextureSource, WaterComponent,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn settings(kind: GraphicsBackendType, size: u32) -> RenderSettings {
    RenderSettings {
        width: size,
        height: size,
        clear_color: LinearRgba::BLACK,
        backend: BackendSelectionConfig {
            preferred: kind,
            fallback_order: Vec::new(),
        },
        shadow_map_size: 32,
        ..RenderSettings::default()
    }
}

fn engine_with(
    kind: GraphicsBackendType,
    size: u32,
    factory: Box<dyn GraphicsContextFactory>,
) -> (RenderEngine, Arc<Canvas>) {
    let canvas = Canvas::new(size, size);
    let window: RenderWindowHandle = canvas.clone();
    let engine = RenderEngine::new(settings(kind, size), window, factory).unwrap();
    (engine, canvas)
}

fn engine(kind: GraphicsBackendType, size: u32) -> (RenderEngine, Arc<Canvas>) {
    engine_with(kind, size, Box::new(SoftContextFactory))
}

/// A red cube lit by ambient light only, seen from the front.
fn ambient_cube(engine: &mut RenderEngine) {
    let mesh = engine.submit_mesh(MeshData::cube(0.5)).unwrap();
    engine
        .add_object(RenderComponent::Mesh(MeshComponent::lit(
            mesh,
            Mat4::IDENTITY,
            Material::solid(LinearRgba::RED),
        )))
        .unwrap();
    engine.set_ambient(LinearRgba::WHITE);
    engine.set_camera(Camera::looking_at(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO));
}

/// Fails to create `failing` contexts and delegates everything else.
struct FailingFactory {
    failing: GraphicsBackendType,
}

impl GraphicsContextFactory for FailingFactory {
    fn create(
        &self,
        kind: GraphicsBackendType,
        window: RenderWindowHandle,
        settings: &RenderSettings,
    ) -> Result<Box<dyn GraphicsContext>, RenderError> {
        if kind == self.failing {
            return Err(RenderError::InitializationFailed(format!("{kind} is disabled")));
        }
        SoftContextFactory.create(kind, window, settings)
    }
}

/// Creates the first `remaining` contexts, then fails every request.
struct ExhaustedFactory {
    remaining: AtomicUsize,
}

impl GraphicsContextFactory for ExhaustedFactory {
    fn create(
        &self,
        kind: GraphicsBackendType,
        window: RenderWindowHandle,
        settings: &RenderSettings,
    ) -> Result<Box<dyn GraphicsContext>, RenderError> {
        let left = self.remaining.load(Ordering::SeqCst);
        if left == 0 {
            return Err(RenderError::DeviceLost);
        }
        self.remaining.store(left - 1, Ordering::SeqCst);
        SoftContextFactory.create(kind, window, settings)
    }
}

#[test]
fn test_backends_render_the_same_image() {
    let mut captures = Vec::new();
    for kind in GraphicsBackendType::ALL {
        let (mut engine, _canvas) = engine(kind, 32);
        ambient_cube(&mut engine);
        let report = engine.draw_frame().unwrap();
        assert!(report.presented);
        assert!(report.validation_errors.is_empty(), "{kind}: {:?}", report.validation_errors);
        assert_eq!(report.stats.draw_calls, 1);
        assert_eq!(report.stats.triangles_submitted, 12);
        let frame = engine.capture_frame().unwrap().expect("a presented frame");
        captures.push((kind, frame));
    }

    let (_, reference) = &captures[0];
    let center = reference.pixel(16, 16);
    assert!(center[0] > 200 && center[1] < 30 && center[2] < 30, "{center:?}");
    assert_eq!(reference.pixel(0, 0)[..3], [0, 0, 0]);
    for (kind, frame) in &captures[1..] {
        assert_eq!((frame.width, frame.height), (reference.width, reference.height));
        for (a, b) in frame.rgba.iter().zip(&reference.rgba) {
            assert!(a.abs_diff(*b) <= 2, "{kind} differs from the reference");
        }
    }
}

#[test]
#[should_panic(expected = "no camera set")]
fn test_drawing_without_a_camera_panics() {
    let (mut engine, _canvas) = engine(GraphicsBackendType::Immediate, 16);
    let _ = engine.draw_frame();
}

#[test]
fn test_switch_round_trip_keeps_resource_counts() {
    let (mut engine, _canvas) = engine(GraphicsBackendType::Immediate, 16);
    ambient_cube(&mut engine);
    engine.load_texture(
        TextureSource::Pixels(PixelImage::solid(4, 4, [10, 20, 30, 255])),
        TextureFlags::MIPMAPS,
    );
    engine.draw_frame().unwrap();
    let before = engine.resource_counts();

    engine.set_graphics_api(GraphicsBackendType::CommandListV2).unwrap();
    assert_eq!(engine.backend_kind(), Some(GraphicsBackendType::CommandListV2));
    engine.draw_frame().unwrap();
    assert!(engine.resource_counts().pipelines > 0);

    engine.set_graphics_api(GraphicsBackendType::Immediate).unwrap();
    engine.draw_frame().unwrap();
    assert_eq!(engine.resource_counts(), before);
}

#[test]
fn test_failed_switch_restores_the_previous_backend() {
    let factory = FailingFactory {
        failing: GraphicsBackendType::CommandListV1,
    };
    let (mut engine, _canvas) = engine_with(GraphicsBackendType::FenceBased, 16, Box::new(factory));
    ambient_cube(&mut engine);
    engine.draw_frame().unwrap();

    let err = engine
        .set_graphics_api(GraphicsBackendType::CommandListV1)
        .unwrap_err();
    match err {
        EngineError::SwitchFailed {
            failed, restored, ..
        } => {
            assert_eq!(failed, GraphicsBackendType::CommandListV1);
            assert_eq!(restored, GraphicsBackendType::FenceBased);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(engine.backend_kind(), Some(GraphicsBackendType::FenceBased));
    let report = engine.draw_frame().unwrap();
    assert_eq!(report.stats.draw_calls, 1);
}

#[test]
fn test_failed_restore_leaves_no_backend() {
    let factory = ExhaustedFactory {
        remaining: AtomicUsize::new(1),
    };
    let (mut engine, _canvas) = engine_with(GraphicsBackendType::Immediate, 16, Box::new(factory));
    ambient_cube(&mut engine);

    let err = engine
        .set_graphics_api(GraphicsBackendType::FenceBased)
        .unwrap_err();
    assert!(matches!(err, EngineError::RestoreFailed { .. }), "{err}");
    assert_eq!(engine.backend_kind(), None);
    assert!(matches!(engine.draw_frame(), Err(EngineError::NoBackend)));
    assert!(matches!(engine.backend_info(), Err(EngineError::NoBackend)));
    assert_eq!(engine.resource_counts().total_objects(), 0);
}

#[test]
fn test_stale_canvas_rebuilds_the_swapchain() {
    let (mut engine, canvas) = engine(GraphicsBackendType::FenceBased, 16);
    ambient_cube(&mut engine);
    assert!(!engine.draw_frame().unwrap().swapchain_rebuilt);

    canvas.set_size(24, 20);
    let report = engine.draw_frame().unwrap();
    assert!(report.swapchain_rebuilt);
    let frame = engine.capture_frame().unwrap().unwrap();
    assert_eq!((frame.width, frame.height), (24, 20));
    assert!(!engine.draw_frame().unwrap().swapchain_rebuilt);
}

#[test]
fn test_resize_survives_the_next_frame() {
    for kind in GraphicsBackendType::ALL {
        let (mut engine, _canvas) = engine(kind, 16);
        ambient_cube(&mut engine);
        engine.resize(32, 16).unwrap();
        let report = engine.draw_frame().unwrap();
        assert!(report.presented, "{kind}");
        let frame = engine.capture_frame().unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (32, 16), "{kind}");
    }
}

#[test]
fn test_wgpu_backends_render_and_resize() {
    for kind in GraphicsBackendType::ALL {
        let canvas = Canvas::new(16, 16);
        let window: RenderWindowHandle = canvas.clone();
        let mut engine = match RenderEngine::new(settings(kind, 16), window, Box::new(DefaultContextFactory)) {
            Ok(engine) => engine,
            Err(e) => {
                eprintln!("skipping {kind}: {e}");
                continue;
            }
        };
        ambient_cube(&mut engine);
        engine.resize(32, 16).unwrap();
        let report = engine.draw_frame().unwrap();
        assert!(report.presented, "{kind}");
        assert!(report.validation_errors.is_empty(), "{kind}: {:?}", report.validation_errors);
        let frame = engine.capture_frame().unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (32, 16), "{kind}");
        assert_eq!(frame.pixel(0, 0), [0, 0, 0, 255], "{kind}");
        assert!(frame.pixel(16, 8)[0] > 0, "{kind}: the cube covers the center");
    }
}

#[test]
fn test_water_sampled_without_its_passes_is_a_stale_read() {
    for kind in GraphicsBackendType::ALL {
        let (mut engine, _canvas) = engine(kind, 16);
        ambient_cube(&mut engine);
        let water = engine.submit_mesh(MeshData::plane(4.0)).unwrap();
        engine
            .add_object(RenderComponent::Water(WaterComponent {
                mesh: water,
                transform: Mat4::from_translation(Vec3::new(0.0, -1.0, 0.0)),
                height: -1.0,
                color: LinearRgba::BLUE,
                distortion: None,
                distortion_strength: 0.02,
                wave_speed: 0.03,
                reflectivity: 0.5,
            }))
            .unwrap();

        let report = engine.draw_frame().unwrap();
        assert!(report.validation_errors.is_empty(), "{kind}: {:?}", report.validation_errors);
        assert_eq!(report.stats.offscreen_passes, 2);

        engine.set_offscreen_passes(false);
        let report = engine.draw_frame().unwrap();
        assert_eq!(report.stats.offscreen_passes, 0);
        assert!(
            report
                .validation_errors
                .iter()
                .any(|e| matches!(e, ValidationError::StaleRead { .. })),
            "{kind}: {:?}",
            report.validation_errors
        );
    }
}

#[test]
fn test_shadow_passes_cover_atlas_layers_and_cube_faces() {
    let (mut engine, _canvas) = engine(GraphicsBackendType::CommandListV1, 16);
    ambient_cube(&mut engine);
    let floor = engine.submit_mesh(MeshData::plane(3.0)).unwrap();
    engine
        .add_object(RenderComponent::Mesh(MeshComponent::lit(
            floor,
            Mat4::from_translation(Vec3::new(0.0, -0.5, 0.0)),
            Material::default(),
        )))
        .unwrap();
    engine.set_lights(vec![
        Light::directional(Vec3::new(-1.0, -1.0, -0.5), LinearRgba::WHITE, 1.0),
        Light::point(Vec3::new(0.0, 2.0, 0.0), LinearRgba::WHITE, 1.0, 10.0),
    ]);

    let report = engine.draw_frame().unwrap();
    assert!(report.validation_errors.is_empty(), "{:?}", report.validation_errors);
    assert_eq!(report.stats.offscreen_passes, 1 + 6);
    // Two casters in seven passes, then both objects in the main pass.
    assert_eq!(report.stats.draw_calls, 2 * 7 + 2);
}

#[test]
fn test_wireframe_mode_redirects_opaque_meshes() {
    let (mut engine, _canvas) = engine(GraphicsBackendType::CommandListV2, 16);
    ambient_cube(&mut engine);
    engine.set_draw_mode(DrawMode::Wireframe);
    let report = engine.draw_frame().unwrap();
    assert_eq!(report.stats.draw_calls, 1);
    assert!(report.validation_errors.is_empty());
}

#[test]
fn test_failed_texture_loads_fall_back_to_the_placeholder() {
    let (mut engine, _canvas) = engine(GraphicsBackendType::Immediate, 16);
    let placeholder = engine.placeholder_texture();

    let missing = engine.load_texture(
        TextureSource::File("/definitely/not/here.png".into()),
        TextureFlags::empty(),
    );
    assert_eq!(missing, placeholder);

    let faces = vec![PixelImage::solid(2, 2, [255, 0, 0, 255]); 5];
    assert_eq!(
        engine.load_texture(TextureSource::Cubemap(faces.clone()), TextureFlags::empty()),
        placeholder
    );
    match engine.try_load_texture(TextureSource::Cubemap(faces), TextureFlags::empty()) {
        Err(EngineError::Texture(err @ TextureError::CubemapFaceCount(5))) => {
            assert_eq!(err.code(), -1)
        }
        other => panic!("unexpected result {other:?}"),
    }

    engine.unload_texture(placeholder).unwrap();
    assert!(engine.texture(placeholder).is_some());
}

#[test]
fn test_skybox_samples_a_cubemap() {
    let (mut engine, _canvas) = engine(GraphicsBackendType::FenceBased, 16);
    let faces = vec![PixelImage::solid(2, 2, [0, 0, 255, 255]); 6];
    let cubemap = engine.load_texture(TextureSource::Cubemap(faces), TextureFlags::empty());
    assert_ne!(cubemap, engine.placeholder_texture());
    let mesh = engine.submit_mesh(MeshData::cube(1.0)).unwrap();
    engine
        .add_object(RenderComponent::Skybox(SkyboxComponent {
            mesh,
            cubemap,
            tint: LinearRgba::WHITE,
        }))
        .unwrap();
    engine.set_camera(Camera::looking_at(Vec3::ZERO, Vec3::new(0.0, 0.0, -1.0)));

    let report = engine.draw_frame().unwrap();
    assert_eq!(report.stats.draw_calls, 1);
    let frame = engine.capture_frame().unwrap().unwrap();
    let center = frame.pixel(8, 8);
    assert!(center[2] > 200 && center[0] < 30, "{center:?}");
}

#[test]
fn test_meshes_are_owned_by_one_object() {
    let (mut engine, _canvas) = engine(GraphicsBackendType::Immediate, 16);
    let mesh = engine.submit_mesh(MeshData::cube(1.0)).unwrap();
    let component = RenderComponent::Mesh(MeshComponent::unlit(mesh, Mat4::IDENTITY, LinearRgba::GREEN));
    let object = engine.add_object(component).unwrap();

    assert!(matches!(engine.add_object(component), Err(EngineError::MeshInUse(m)) if m == mesh));
    assert!(matches!(engine.remove_mesh(mesh), Err(EngineError::MeshInUse(_))));

    engine.remove_object(object).unwrap();
    assert!(matches!(engine.remove_object(object), Err(EngineError::UnknownObject(_))));
    engine.remove_mesh(mesh).unwrap();
    assert!(engine.mesh(mesh).is_none());
    assert!(matches!(engine.remove_mesh(mesh), Err(EngineError::UnknownMesh(_))));
}

#[test]
fn test_clip_volume_hides_geometry_outside_it() {
    let (mut engine, _canvas) = engine(GraphicsBackendType::CommandListV1, 32);
    let mesh = engine.submit_mesh(MeshData::cube(0.5)).unwrap();
    let mut component = MeshComponent::lit(mesh, Mat4::IDENTITY, Material::solid(LinearRgba::RED));
    component.clip = Some(ClipVolume {
        min: Vec3::new(5.0, 5.0, 5.0),
        max: Vec3::new(6.0, 6.0, 6.0),
    });
    engine.add_object(RenderComponent::Mesh(component)).unwrap();
    engine.set_ambient(LinearRgba::WHITE);
    engine.set_camera(Camera::looking_at(Vec3::new(0.0, 0.0, 3.0), Vec3::ZERO));

    engine.draw_frame().unwrap();
    let frame = engine.capture_frame().unwrap().unwrap();
    assert_eq!(frame.pixel(16, 16)[..3], [0, 0, 0]);
}

#[test]
fn test_shutdown_releases_everything_once() {
    let (mut engine, _canvas) = engine(GraphicsBackendType::CommandListV2, 16);
    ambient_cube(&mut engine);
    engine.draw_frame().unwrap();
    assert!(engine.resource_counts().total_objects() > 0);
    assert!(engine.backend_info().unwrap().to_string().contains("command list"));

    engine.shutdown();
    engine.shutdown();
    assert_eq!(engine.backend_kind(), None);
    assert_eq!(engine.resource_counts(), Default::default());
    assert!(matches!(
        engine.set_graphics_api(GraphicsBackendType::Immediate),
        Err(EngineError::NoBackend)
    ));
}
