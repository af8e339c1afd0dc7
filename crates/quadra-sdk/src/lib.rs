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

//! # Quadra SDK
//!
//! The public face of Quadra. [`RenderEngine`] owns the active graphics context,
//! every resource created through it and the scene it draws. Applications submit
//! meshes and textures, attach them to objects, and call
//! [`RenderEngine::draw_frame`] once per frame.

pub mod engine;
pub mod error;
pub mod resources;
pub mod scene;

pub use engine::{RenderEngine, TextureSource};
pub use error::{EngineError, GpuBufferError, UniformError};
pub use scene::{
    DrawMode, HudComponent, Material, MeshComponent, MeshData, MeshHandle, ObjectId,
    RenderComponent, SkyboxComponent, TerrainComponent, TextureHandle, WaterComponent,
};

pub use quadra_core::math;
pub use quadra_core::platform::{RenderWindow, RenderWindowHandle};
pub use quadra_core::renderer::api::{
    BackendSelectionConfig, Camera, CapturedFrame, FrameReport, GraphicsAdapterInfo,
    GraphicsBackendType, Light, RenderSettings, RenderStats, ResourceCounts, TextureFlags,
};
pub use quadra_core::Canvas;
pub use quadra_infra::{DefaultContextFactory, SoftContextFactory};
