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

// Quadra Sandbox
// Renders one scene through every backend and writes a PNG capture per backend.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use quadra_sdk::math::{LinearRgba, Mat4, Vec3, Vec4};
use quadra_sdk::resources::PixelImage;
use quadra_sdk::{
    Camera, Canvas, GraphicsBackendType, HudComponent, Light, Material, MeshComponent, MeshData,
    RenderComponent, RenderEngine, RenderSettings, RenderWindowHandle, SkyboxComponent,
    SoftContextFactory, TerrainComponent, TextureFlags, TextureSource, WaterComponent,
};

const SETTINGS_FILE: &str = "sandbox.json";

fn checker(size: u32, a: [u8; 4], b: [u8; 4]) -> PixelImage {
    let mut rgba = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            rgba.extend_from_slice(if (x / 4 + y / 4) % 2 == 0 { &a } else { &b });
        }
    }
    PixelImage {
        width: size,
        height: size,
        rgba,
    }
}

fn build_scene(engine: &mut RenderEngine) -> Result<()> {
    let sky_faces = [
        [140, 180, 230, 255],
        [140, 180, 230, 255],
        [200, 220, 250, 255],
        [90, 110, 140, 255],
        [150, 190, 235, 255],
        [150, 190, 235, 255],
    ]
    .map(|color| PixelImage::solid(8, 8, color))
    .to_vec();
    let sky = engine.load_texture(TextureSource::Cubemap(sky_faces), TextureFlags::empty());
    let grass = engine.load_texture(
        TextureSource::Pixels(checker(32, [60, 140, 60, 255], [40, 110, 40, 255])),
        TextureFlags::REPEAT | TextureFlags::MIPMAPS,
    );
    let rock = engine.load_texture(
        TextureSource::Pixels(checker(32, [120, 120, 120, 255], [90, 90, 90, 255])),
        TextureFlags::REPEAT | TextureFlags::MIPMAPS,
    );
    let crate_texture = engine.load_texture(
        TextureSource::Pixels(checker(16, [180, 120, 60, 255], [140, 90, 40, 255])),
        TextureFlags::SRGB,
    );

    let skybox = engine.submit_mesh(MeshData::cube(1.0))?;
    engine.add_object(RenderComponent::Skybox(SkyboxComponent {
        mesh: skybox,
        cubemap: sky,
        tint: LinearRgba::WHITE,
    }))?;

    let ground = engine.submit_mesh(MeshData::plane(8.0))?;
    engine.add_object(RenderComponent::Terrain(TerrainComponent {
        mesh: ground,
        transform: Mat4::IDENTITY,
        material: Material::default(),
        layers: [Some(grass), Some(grass), Some(rock)],
        layer_tiling: [4.0, 4.0, 2.0],
        min_height: -1.0,
        max_height: 2.0,
        blend_sharpness: 2.0,
    }))?;

    let lake = engine.submit_mesh(MeshData::plane(3.0))?;
    engine.add_object(RenderComponent::Water(WaterComponent {
        mesh: lake,
        transform: Mat4::from_translation(Vec3::new(3.0, 0.05, 3.0)),
        height: 0.05,
        color: LinearRgba::new(0.1, 0.3, 0.5, 0.8),
        distortion: None,
        distortion_strength: 0.02,
        wave_speed: 0.03,
        reflectivity: 0.6,
    }))?;

    let cube = engine.submit_mesh(MeshData::cube(0.75))?;
    engine.add_object(RenderComponent::Mesh(MeshComponent::lit(
        cube,
        Mat4::from_translation(Vec3::new(0.0, 0.75, 0.0)) * Mat4::from_rotation_y(0.6),
        Material {
            diffuse: Some(crate_texture),
            specular_intensity: 0.3,
            ..Material::default()
        },
    )))?;

    let marker = engine.submit_mesh(MeshData::cube(0.2))?;
    engine.add_object(RenderComponent::Mesh(MeshComponent::unlit(
        marker,
        Mat4::from_translation(Vec3::new(-2.0, 2.5, 1.0)),
        LinearRgba::new(1.0, 0.9, 0.6, 1.0),
    )))?;

    let badge = engine.submit_mesh(MeshData::quad())?;
    engine.add_object(RenderComponent::Hud(HudComponent {
        mesh: badge,
        transform: Mat4::from_translation(Vec3::new(-0.85, 0.85, 0.0))
            * Mat4::from_scale(Vec3::new(0.1, 0.1, 1.0)),
        texture: None,
        color: LinearRgba::new(1.0, 1.0, 1.0, 0.7),
        uv_rect: Vec4::new(0.0, 0.0, 1.0, 1.0),
    }))?;

    engine.set_lights(vec![
        Light::directional(Vec3::new(-0.4, -1.0, -0.3), LinearRgba::WHITE, 0.9),
        Light::point(Vec3::new(-2.0, 2.5, 1.0), LinearRgba::rgb(1.0, 0.8, 0.5), 1.5, 6.0),
    ]);
    engine.set_ambient(LinearRgba::rgb(0.25, 0.25, 0.3));
    engine.set_camera(Camera::looking_at(Vec3::new(6.0, 4.0, 8.0), Vec3::new(0.0, 0.5, 0.0)));
    Ok(())
}

fn save_capture(engine: &mut RenderEngine, path: &Path) -> Result<()> {
    let frame = engine
        .capture_frame()?
        .context("the backend has not presented a frame yet")?;
    let image = image::RgbaImage::from_raw(frame.width, frame.height, frame.rgba)
        .context("captured frame has an unexpected size")?;
    image
        .save(path)
        .with_context(|| format!("failed to write {}", path.display()))?;
    log::info!("Saved {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    use env_logger::{Builder, Env};

    Builder::from_env(Env::default().default_filter_or("info")).init();

    let settings = if Path::new(SETTINGS_FILE).exists() {
        RenderSettings::load(Path::new(SETTINGS_FILE))?
    } else {
        RenderSettings {
            width: 320,
            height: 180,
            ..RenderSettings::default()
        }
    };
    let out_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("captures"));
    std::fs::create_dir_all(&out_dir)?;

    let canvas = Canvas::new(settings.width, settings.height);
    let window: RenderWindowHandle = canvas.clone();
    let mut engine = match RenderEngine::with_default_factory(settings.clone(), window.clone()) {
        Ok(engine) => engine,
        Err(e) => {
            log::warn!("No wgpu adapter ({e}); rendering on the software device");
            RenderEngine::new(settings, window, Box::new(SoftContextFactory))?
        }
    };
    log::info!("Adapter: {}", engine.backend_info()?);
    build_scene(&mut engine)?;

    for kind in GraphicsBackendType::ALL {
        if let Err(e) = engine.set_graphics_api(kind) {
            log::warn!("Skipping {kind}: {e}");
            continue;
        }
        // Two frames so every frame slot has been used once.
        for _ in 0..2 {
            let report = engine.draw_frame()?;
            for error in &report.validation_errors {
                log::warn!("{kind}: {error}");
            }
            log::info!(
                "{kind}: frame {} with {} draws, {} triangles, {} offscreen passes",
                report.stats.frame_number,
                report.stats.draw_calls,
                report.stats.triangles_submitted,
                report.stats.offscreen_passes
            );
        }
        save_capture(&mut engine, &out_dir.join(format!("{}.png", kind.name())))?;
    }

    engine.shutdown();
    Ok(())
}
