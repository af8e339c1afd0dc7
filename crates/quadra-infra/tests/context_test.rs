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

//! Integration tests for the four backend models on the software device.
//!
//! Every scenario runs against each backend through the `GraphicsContext` and
//! `GraphicsDevice` traits only, the way the render engine drives them.

use quadra_core::math::{Extent3D, LinearRgba, Mat4, Vec3, Vec4};
use quadra_core::platform::RenderWindowHandle;
use quadra_core::renderer::api::*;
use quadra_core::renderer::{
    GraphicsContext, GraphicsContextFactory, GraphicsDevice, PipelineError, PresentOutcome,
    RenderError, ResourceError, ValidationError,
};
use quadra_core::Canvas;
use quadra_infra::{CommandListV2Context, FencedContext, SoftContextFactory};
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;

const ORANGE: Vec4 = Vec4::new(1.0, 0.5, 0.0, 1.0);
const BLACK: LinearRgba = LinearRgba::BLACK;

fn settings(size: u32) -> RenderSettings {
    RenderSettings {
        width: size,
        height: size,
        ..RenderSettings::default()
    }
}

fn context(kind: GraphicsBackendType, canvas: &Arc<Canvas>) -> Box<dyn GraphicsContext> {
    let window: RenderWindowHandle = canvas.clone();
    let (width, _) = quadra_core::platform::RenderWindow::inner_size(canvas.as_ref());
    SoftContextFactory
        .create(kind, window, &settings(width))
        .expect("context creation")
}

/// A clip-space-centered triangle drawn with the solid color shader.
struct Triangle {
    device: Arc<dyn GraphicsDevice>,
    module: ShaderModuleId,
    pipelines: HashMap<TargetClass, PipelineId>,
    vertex: BufferId,
    index: BufferId,
    uniform: BufferId,
}

impl Triangle {
    fn new(device: Arc<dyn GraphicsDevice>) -> Self {
        let caps = device.capabilities();
        let module = device
            .create_shader_module(&ShaderModuleDescriptor {
                label: Some(Cow::Borrowed("color")),
                program: ShaderId::Color,
                source: Cow::Owned(ShaderSource::embedded(ShaderId::Color, caps.shader_format)),
            })
            .unwrap();
        let mut pipelines = HashMap::new();
        if caps.bakes_pipelines {
            for target in TargetClass::ALL {
                let id = device
                    .create_render_pipeline(&PipelineDescriptor {
                        label: None,
                        shader: ShaderId::Color,
                        module,
                        target,
                        vertex_stride: VERTEX_STRIDE,
                        state: RasterState::for_shader(ShaderId::Color),
                    })
                    .unwrap();
                pipelines.insert(target, id);
            }
        }

        let vertices = interleave_vertices(
            &[
                Vec3::new(-0.5, -0.5, 0.0),
                Vec3::new(0.5, -0.5, 0.0),
                Vec3::new(0.0, 0.5, 0.0),
            ],
            &[],
            &[],
        );
        let vertex = device
            .create_buffer_with_data(
                &BufferDescriptor {
                    label: None,
                    size: std::mem::size_of_val(vertices.as_slice()) as u64,
                    usage: BufferUsage::VERTEX | BufferUsage::COPY_DST,
                },
                bytemuck::cast_slice(&vertices),
            )
            .unwrap();
        let indices: [u32; 3] = [0, 1, 2];
        let index = device
            .create_buffer_with_data(
                &BufferDescriptor {
                    label: None,
                    size: 12,
                    usage: BufferUsage::INDEX | BufferUsage::COPY_DST,
                },
                bytemuck::cast_slice(&indices),
            )
            .unwrap();
        let uniform = device
            .create_buffer(&BufferDescriptor {
                label: None,
                size: std::mem::size_of::<ColorUniforms>() as u64,
                usage: BufferUsage::UNIFORM | BufferUsage::COPY_DST,
            })
            .unwrap();

        Self {
            device,
            module,
            pipelines,
            vertex,
            index,
            uniform,
        }
    }

    fn set_color(&self, color: Vec4) {
        let uniforms = ColorUniforms {
            model: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            color,
            clip_plane: Vec4::ZERO,
        };
        self.device
            .write_buffer(self.uniform, 0, bytemuck::bytes_of(&uniforms))
            .unwrap();
    }

    fn call<'a>(&self, target: TargetClass, textures: &'a [TextureBinding]) -> DrawCall<'a> {
        DrawCall {
            vertex_buffer: self.vertex,
            index_buffer: self.index,
            index_count: 3,
            shader: ShaderId::Color,
            module: self.module,
            pipeline: self.pipelines.get(&target).copied(),
            state: RasterState::for_shader(ShaderId::Color),
            uniform_buffer: self.uniform,
            textures,
        }
    }

    fn destroy(self) {
        for id in self.pipelines.into_values() {
            self.device.destroy_render_pipeline(id).unwrap();
        }
        self.device.destroy_shader_module(self.module).unwrap();
        for id in [self.vertex, self.index, self.uniform] {
            self.device.destroy_buffer(id).unwrap();
        }
    }
}

fn color_target(device: &dyn GraphicsDevice, size: u32) -> (TextureId, FramebufferId) {
    let texture = device
        .create_texture(
            &TextureDescriptor {
                label: None,
                size: Extent3D {
                    width: size,
                    height: size,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                format: TextureFormat::Rgba8Unorm,
                dimension: TextureDimension::D2,
                usage: TextureUsage::SAMPLED | TextureUsage::RENDER_TARGET | TextureUsage::COPY_SRC,
            },
            None,
        )
        .unwrap();
    let framebuffer = device
        .create_framebuffer(&FramebufferDescriptor {
            label: None,
            color: Some(texture),
            depth: None,
        })
        .unwrap();
    (texture, framebuffer)
}

fn depth_target(device: &dyn GraphicsDevice, size: u32) -> (TextureId, FramebufferId) {
    let texture = device
        .create_texture(
            &TextureDescriptor {
                label: None,
                size: Extent3D {
                    width: size,
                    height: size,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                format: TextureFormat::Depth32Float,
                dimension: TextureDimension::D2,
                usage: TextureUsage::SAMPLED | TextureUsage::DEPTH_TARGET,
            },
            None,
        )
        .unwrap();
    let framebuffer = device
        .create_framebuffer(&FramebufferDescriptor {
            label: None,
            color: None,
            depth: Some(texture),
        })
        .unwrap();
    (texture, framebuffer)
}

fn pixel(rgba: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
    let i = ((y * width + x) * 4) as usize;
    [rgba[i], rgba[i + 1], rgba[i + 2], rgba[i + 3]]
}

// ─────────────────────────────────────────────────────────────────────────────
// Backend equivalence
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_solid_triangle_is_identical_on_every_backend() {
    let mut captures = Vec::new();
    for kind in GraphicsBackendType::ALL {
        let canvas = Canvas::new(64, 64);
        let mut ctx = context(kind, &canvas);
        let triangle = Triangle::new(ctx.device());

        ctx.begin_frame(BLACK).unwrap();
        triangle.set_color(ORANGE);
        ctx.draw(&triangle.call(TargetClass::Screen, &[])).unwrap();
        assert_eq!(ctx.present().unwrap(), PresentOutcome::Presented);

        let frame = ctx.capture_frame().unwrap().expect("a presented frame");
        assert_eq!((frame.width, frame.height), (64, 64));
        assert_eq!(frame.pixel(32, 32), [255, 128, 0, 255], "{kind}");
        // Wide part of the triangle is at the bottom of the image.
        assert_eq!(frame.pixel(20, 44), [255, 128, 0, 255], "{kind}");
        assert_eq!(frame.pixel(20, 19), [0, 0, 0, 255], "{kind}");
        assert_eq!(frame.pixel(0, 0), [0, 0, 0, 255], "{kind}");
        assert!(ctx.take_validation_errors().is_empty(), "{kind}");

        captures.push(frame);
        triangle.destroy();
        ctx.release();
    }
    // Edge coverage may differ by a pixel where the framebuffer origin flips.
    for frame in &captures[1..] {
        let differing = frame
            .rgba
            .chunks_exact(4)
            .zip(captures[0].rgba.chunks_exact(4))
            .filter(|(a, b)| a != b)
            .count();
        assert!(differing <= 64, "{differing} pixels differ");
    }
}

#[test]
fn test_back_faces_are_culled() {
    for kind in GraphicsBackendType::ALL {
        let canvas = Canvas::new(32, 32);
        let mut ctx = context(kind, &canvas);
        let triangle = Triangle::new(ctx.device());
        let mirrored = ColorUniforms {
            model: Mat4::from_scale(Vec3::new(-1.0, 1.0, 1.0)),
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            color: ORANGE,
            clip_plane: Vec4::ZERO,
        };

        ctx.begin_frame(BLACK).unwrap();
        ctx.device()
            .write_buffer(triangle.uniform, 0, bytemuck::bytes_of(&mirrored))
            .unwrap();
        ctx.draw(&triangle.call(TargetClass::Screen, &[])).unwrap();
        ctx.present().unwrap();

        let frame = ctx.capture_frame().unwrap().unwrap();
        assert_eq!(frame.pixel(16, 16), [0, 0, 0, 255], "{kind}");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame pacing
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_frames_in_flight_keep_their_own_uniform_copy() {
    for kind in GraphicsBackendType::ALL {
        let canvas = Canvas::new(16, 16);
        let mut ctx = context(kind, &canvas);
        let device = ctx.device();
        let triangle = Triangle::new(device.clone());
        let (first, first_fb) = color_target(device.as_ref(), 16);
        let (second, second_fb) = color_target(device.as_ref(), 16);

        for (framebuffer, color) in [(first_fb, ORANGE), (second_fb, Vec4::new(0.0, 1.0, 0.0, 1.0))] {
            ctx.begin_frame(BLACK).unwrap();
            triangle.set_color(color);
            ctx.bind_target(framebuffer, 0, Some(BLACK)).unwrap();
            ctx.draw(&triangle.call(TargetClass::OffscreenColor, &[])).unwrap();
            ctx.unbind_target().unwrap();
            ctx.present().unwrap();
        }
        ctx.wait_idle().unwrap();

        let first = device.read_texture(first, 0, 0).unwrap();
        let second = device.read_texture(second, 0, 0).unwrap();
        assert_eq!(pixel(&first, 16, 8, 8), [255, 128, 0, 255], "{kind}");
        assert_eq!(pixel(&second, 16, 8, 8), [0, 255, 0, 255], "{kind}");
        assert!(ctx.take_validation_errors().is_empty(), "{kind}");
    }
}

#[test]
fn test_cpu_never_runs_more_than_n_frames_ahead() {
    let canvas = Canvas::new(8, 8);
    let mut ctx = FencedContext::new(canvas.clone(), &settings(8)).unwrap();
    let triangle = Triangle::new(ctx.device());

    for frame in 0..6 {
        ctx.begin_frame(BLACK).unwrap();
        assert_eq!(ctx.frame_index(), frame % 2);
        triangle.set_color(ORANGE);
        ctx.draw(&triangle.call(TargetClass::Screen, &[])).unwrap();
        ctx.present().unwrap();
        // Render and present submissions of the two slots, plus the oldest present.
        assert!(ctx.pending_submissions() <= 5, "frame {frame}");
    }
    assert!(ctx.pending_submissions() > 0);
    ctx.wait_idle().unwrap();
    assert_eq!(ctx.pending_submissions(), 0);
    assert!(ctx.take_validation_errors().is_empty());
}

// ─────────────────────────────────────────────────────────────────────────────
// Swapchain lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_resize_round_trip_leaks_nothing() {
    for kind in GraphicsBackendType::ALL {
        let canvas = Canvas::new(64, 48);
        let mut ctx = context(kind, &canvas);
        let device = ctx.device();
        let before = device.resource_counts();

        ctx.resize(32, 16).unwrap();
        assert_eq!(ctx.surface_extent(), quadra_core::math::Extent2D::new(32, 16));
        ctx.resize(64, 48).unwrap();

        assert_eq!(ctx.surface_extent(), quadra_core::math::Extent2D::new(64, 48));
        assert_eq!(device.resource_counts(), before, "{kind}");
        assert_eq!(ctx.state(), ContextState::Ready);
    }
}

#[test]
fn test_zero_size_resize_is_ignored() {
    let canvas = Canvas::new(20, 20);
    let mut ctx = context(GraphicsBackendType::CommandListV1, &canvas);
    ctx.resize(0, 10).unwrap();
    assert_eq!(ctx.surface_extent(), quadra_core::math::Extent2D::new(20, 20));
}

#[test]
fn test_stale_canvas_rebuilds_instead_of_failing() {
    for kind in GraphicsBackendType::ALL {
        let canvas = Canvas::new(32, 32);
        let mut ctx = context(kind, &canvas);

        canvas.set_size(40, 24);
        ctx.begin_frame(BLACK).unwrap();
        assert_eq!(ctx.present().unwrap(), PresentOutcome::Rebuilt, "{kind}");
        assert_eq!(ctx.surface_extent(), quadra_core::math::Extent2D::new(40, 24));

        let frame = ctx.capture_frame().unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (40, 24));

        ctx.begin_frame(BLACK).unwrap();
        assert_eq!(ctx.present().unwrap(), PresentOutcome::Presented);
    }
}

#[test]
fn test_resize_holds_until_the_canvas_changes() {
    for kind in GraphicsBackendType::ALL {
        let canvas = Canvas::new(64, 64);
        let mut ctx = context(kind, &canvas);

        ctx.resize(32, 16).unwrap();
        for _ in 0..2 {
            ctx.begin_frame(BLACK).unwrap();
            assert_eq!(ctx.present().unwrap(), PresentOutcome::Presented, "{kind}");
            let frame = ctx.capture_frame().unwrap().unwrap();
            assert_eq!((frame.width, frame.height), (32, 16), "{kind}");
        }

        canvas.set_size(40, 40);
        ctx.begin_frame(BLACK).unwrap();
        ctx.present().unwrap();
        let frame = ctx.capture_frame().unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (40, 40), "{kind}");
    }
}

#[test]
fn test_canvas_resized_mid_frame_presents_suboptimal_and_rebuilds() {
    for kind in GraphicsBackendType::ALL {
        let canvas = Canvas::new(32, 32);
        let mut ctx = context(kind, &canvas);

        ctx.begin_frame(BLACK).unwrap();
        canvas.set_size(48, 24);
        assert_eq!(ctx.present().unwrap(), PresentOutcome::Rebuilt, "{kind}");
        assert_eq!(ctx.surface_extent(), quadra_core::math::Extent2D::new(48, 24));
        // The image that was in flight still had the old size.
        let frame = ctx.capture_frame().unwrap().unwrap();
        assert_eq!((frame.width, frame.height), (32, 32), "{kind}");

        ctx.begin_frame(BLACK).unwrap();
        assert_eq!(ctx.present().unwrap(), PresentOutcome::Presented, "{kind}");
    }
}

#[test]
fn test_resize_beyond_the_memory_budget_is_an_error() {
    let canvas = Canvas::new(16, 16);
    let window: RenderWindowHandle = canvas.clone();
    let mut ctx = SoftContextFactory
        .create(
            GraphicsBackendType::FenceBased,
            window,
            &RenderSettings {
                memory_budget_bytes: Some(1 << 20),
                ..settings(16)
            },
        )
        .unwrap();

    assert!(ctx.resize(65536, 65536).is_err());
    assert_eq!(ctx.state(), ContextState::Ready);

    ctx.begin_frame(BLACK).unwrap();
    ctx.present().unwrap();
    let frame = ctx.capture_frame().unwrap().unwrap();
    assert_eq!((frame.width, frame.height), (16, 16));
}

#[test]
fn test_minimized_canvas_skips_frames() {
    let canvas = Canvas::new(32, 32);
    let mut ctx = context(GraphicsBackendType::FenceBased, &canvas);

    canvas.set_size(0, 0);
    ctx.begin_frame(BLACK).unwrap();
    assert_eq!(ctx.present().unwrap(), PresentOutcome::Skipped);

    canvas.set_size(32, 32);
    ctx.begin_frame(BLACK).unwrap();
    assert_eq!(ctx.present().unwrap(), PresentOutcome::Presented);
}

#[test]
fn test_release_frees_every_backend_object() {
    for kind in GraphicsBackendType::ALL {
        let canvas = Canvas::new(16, 16);
        let mut ctx = context(kind, &canvas);
        let device = ctx.device();
        let triangle = Triangle::new(device.clone());

        ctx.begin_frame(BLACK).unwrap();
        triangle.set_color(ORANGE);
        ctx.draw(&triangle.call(TargetClass::Screen, &[])).unwrap();
        ctx.present().unwrap();
        triangle.destroy();

        ctx.release();
        ctx.release();
        assert_eq!(ctx.state(), ContextState::Released);
        assert_eq!(device.resource_counts().total_objects(), 0, "{kind}");
        assert_eq!(device.resource_counts().bytes_allocated, 0, "{kind}");
        assert!(matches!(ctx.begin_frame(BLACK), Err(RenderError::NotInitialized)));
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Contract violations
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_sampling_a_target_not_written_this_frame_is_a_stale_read() {
    for kind in GraphicsBackendType::ALL {
        let canvas = Canvas::new(16, 16);
        let mut ctx = context(kind, &canvas);
        let device = ctx.device();
        let triangle = Triangle::new(device.clone());
        let (reflection, _) = color_target(device.as_ref(), 16);
        let sampler = device.create_sampler(&SamplerDescriptor::default()).unwrap();
        let bindings = [TextureBinding {
            slot: 0,
            texture: reflection,
            sampler,
        }];

        ctx.begin_frame(BLACK).unwrap();
        triangle.set_color(ORANGE);
        ctx.draw(&triangle.call(TargetClass::Screen, &bindings)).unwrap();
        ctx.present().unwrap();

        assert_eq!(
            ctx.take_validation_errors(),
            vec![ValidationError::StaleRead {
                texture: reflection
            }],
            "{kind}"
        );
    }
}

#[test]
fn test_shadow_map_must_be_prepared_before_sampling() {
    for kind in GraphicsBackendType::ALL {
        let canvas = Canvas::new(16, 16);
        let mut ctx = context(kind, &canvas);
        let device = ctx.device();
        let triangle = Triangle::new(device.clone());
        let (shadow, shadow_fb) = depth_target(device.as_ref(), 16);
        let sampler = device.create_sampler(&SamplerDescriptor::default()).unwrap();
        let bindings = [TextureBinding {
            slot: 0,
            texture: shadow,
            sampler,
        }];

        for prepare in [false, true] {
            ctx.begin_frame(BLACK).unwrap();
            triangle.set_color(ORANGE);
            ctx.bind_target(shadow_fb, 0, Some(BLACK)).unwrap();
            ctx.draw(&triangle.call(TargetClass::DepthOnly, &[])).unwrap();
            ctx.unbind_target().unwrap();
            if prepare {
                ctx.prepare_sampled(&[shadow]).unwrap();
            }
            ctx.draw(&triangle.call(TargetClass::Screen, &bindings)).unwrap();
            ctx.present().unwrap();

            let errors = ctx.take_validation_errors();
            let explicit = kind.capabilities().explicit_sync;
            if explicit && !prepare {
                assert_eq!(
                    errors,
                    vec![ValidationError::ReadWhileWritable {
                        texture: shadow,
                        layer: 0
                    }],
                    "{kind}"
                );
            } else {
                assert!(errors.is_empty(), "{kind}: {errors:?}");
            }
        }
    }
}

#[test]
fn test_bind_without_unbind_is_reported_at_present() {
    for kind in GraphicsBackendType::ALL {
        let canvas = Canvas::new(16, 16);
        let mut ctx = context(kind, &canvas);
        let (_, framebuffer) = color_target(ctx.device().as_ref(), 16);

        ctx.begin_frame(BLACK).unwrap();
        ctx.bind_target(framebuffer, 0, Some(BLACK)).unwrap();
        ctx.present().unwrap();
        assert_eq!(
            ctx.take_validation_errors(),
            vec![ValidationError::UnmatchedBind {
                framebuffer,
                layer: 0
            }],
            "{kind}"
        );

        ctx.begin_frame(BLACK).unwrap();
        ctx.unbind_target().unwrap();
        ctx.present().unwrap();
        assert_eq!(ctx.take_validation_errors(), vec![ValidationError::UnbindWithoutBind]);
    }
}

#[test]
fn test_binding_a_missing_layer_fails() {
    let canvas = Canvas::new(16, 16);
    let mut ctx = context(GraphicsBackendType::FenceBased, &canvas);
    let (_, framebuffer) = color_target(ctx.device().as_ref(), 16);

    ctx.begin_frame(BLACK).unwrap();
    assert_eq!(
        ctx.bind_target(framebuffer, 1, None),
        Err(RenderError::ResourceError(ResourceError::OutOfBounds))
    );
    ctx.present().unwrap();
}

#[test]
fn test_command_lists_require_a_pipeline_of_the_bound_class() {
    for kind in [GraphicsBackendType::CommandListV1, GraphicsBackendType::CommandListV2] {
        let canvas = Canvas::new(16, 16);
        let mut ctx = context(kind, &canvas);
        let triangle = Triangle::new(ctx.device());
        let (_, framebuffer) = color_target(ctx.device().as_ref(), 16);

        ctx.begin_frame(BLACK).unwrap();
        triangle.set_color(ORANGE);
        let mut call = triangle.call(TargetClass::Screen, &[]);
        call.pipeline = None;
        assert_eq!(
            ctx.draw(&call),
            Err(RenderError::ResourceError(ResourceError::Pipeline(
                PipelineError::MissingPipeline {
                    shader: ShaderId::Color,
                    target: TargetClass::Screen
                }
            )))
        );

        ctx.bind_target(framebuffer, 0, Some(BLACK)).unwrap();
        ctx.draw(&triangle.call(TargetClass::Screen, &[])).unwrap();
        ctx.unbind_target().unwrap();
        ctx.present().unwrap();
        assert_eq!(
            ctx.take_validation_errors(),
            vec![ValidationError::PipelineTargetMismatch {
                shader: ShaderId::Color,
                pipeline: TargetClass::Screen,
                target: TargetClass::OffscreenColor
            }]
        );
    }
}

#[test]
fn test_descriptor_released_before_execution_is_detected() {
    let canvas = Canvas::new(16, 16);
    let mut ctx = CommandListV2Context::new(canvas.clone(), &settings(16)).unwrap();
    let device = ctx.device();
    let triangle = Triangle::new(device.clone());
    let (texture, framebuffer) = color_target(device.as_ref(), 16);
    let sampler = device.create_sampler(&SamplerDescriptor::default()).unwrap();
    let bindings = [TextureBinding {
        slot: 0,
        texture,
        sampler,
    }];

    ctx.begin_frame(BLACK).unwrap();
    triangle.set_color(ORANGE);
    ctx.bind_target(framebuffer, 0, Some(BLACK)).unwrap();
    ctx.unbind_target().unwrap();
    ctx.draw(&triangle.call(TargetClass::Screen, &bindings)).unwrap();
    device.destroy_framebuffer(framebuffer).unwrap();
    device.destroy_texture(texture).unwrap();
    ctx.present().unwrap();
    ctx.wait_idle().unwrap();

    assert_eq!(
        ctx.take_validation_errors(),
        vec![ValidationError::DescriptorReleased { slot: 0 }]
    );
}

#[test]
fn test_validation_can_be_disabled() {
    let canvas = Canvas::new(16, 16);
    let settings = RenderSettings {
        validation: false,
        ..settings(16)
    };
    let mut ctx = FencedContext::new(canvas.clone(), &settings).unwrap();

    ctx.begin_frame(BLACK).unwrap();
    ctx.unbind_target().unwrap();
    ctx.present().unwrap();
    assert!(ctx.take_validation_errors().is_empty());
}
