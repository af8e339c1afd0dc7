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

//! Adapter selection for each backend model.
//!
//! Every model is pinned to one wgpu backend: `Immediate` runs on OpenGL,
//! `CommandListV1` on DirectX 12, and `FenceBased` and `CommandListV2` on Vulkan.
//! An adapter that reports another backend is rejected so selection can fall back
//! to the next model.

use quadra_core::renderer::api::{GraphicsAdapterInfo, GraphicsBackendType};
use quadra_core::renderer::RenderError;
use wgpu::{Adapter, Backend, Backends, Instance, RequestAdapterOptions};

/// Returns a human-readable name for a backend.
pub fn backend_name(backend: Backend) -> &'static str {
    match backend {
        Backend::Vulkan => "Vulkan",
        Backend::Metal => "Metal",
        Backend::Dx12 => "DirectX 12",
        Backend::Gl => "OpenGL",
        Backend::BrowserWebGpu => "WebGPU",
        Backend::Noop => "No-op",
    }
}

/// The wgpu backend a backend model runs on.
pub fn backend_for(kind: GraphicsBackendType) -> Backend {
    match kind {
        GraphicsBackendType::Immediate => Backend::Gl,
        GraphicsBackendType::FenceBased => Backend::Vulkan,
        GraphicsBackendType::CommandListV1 => Backend::Dx12,
        GraphicsBackendType::CommandListV2 => Backend::Vulkan,
    }
}

fn backend_mask(backend: Backend) -> Backends {
    match backend {
        Backend::Vulkan => Backends::VULKAN,
        Backend::Metal => Backends::METAL,
        Backend::Dx12 => Backends::DX12,
        Backend::Gl => Backends::GL,
        Backend::BrowserWebGpu => Backends::BROWSER_WEBGPU,
        Backend::Noop => Backends::empty(),
    }
}

/// Finds the adapter of one backend model on an instance restricted to its backend.
#[derive(Debug)]
pub struct WgpuBackendSelector {
    instance: Instance,
    kind: GraphicsBackendType,
}

impl WgpuBackendSelector {
    /// Creates an instance that only enumerates the backend of `kind`.
    pub fn new(kind: GraphicsBackendType, validation: bool) -> Self {
        let flags = if validation {
            wgpu::InstanceFlags::debugging()
        } else {
            wgpu::InstanceFlags::empty()
        };
        let instance = Instance::new(wgpu::InstanceDescriptor {
            backends: backend_mask(backend_for(kind)),
            flags,
            memory_budget_thresholds: Default::default(),
            backend_options: Default::default(),
            display: None,
        });
        Self { instance, kind }
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Blocks until an adapter of the requested backend is found.
    pub fn select(&self) -> Result<Adapter, RenderError> {
        pollster::block_on(self.try_backend())
    }

    async fn try_backend(&self) -> Result<Adapter, RenderError> {
        let backend = backend_for(self.kind);
        let adapter = self
            .instance
            .request_adapter(&RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| {
                RenderError::InitializationFailed(format!(
                    "No {} adapter for {}: {e}",
                    backend_name(backend),
                    self.kind
                ))
            })?;

        let info = adapter.get_info();
        if info.backend != backend {
            return Err(RenderError::InitializationFailed(format!(
                "Adapter returned wrong backend: requested {}, got {}",
                backend_name(backend),
                backend_name(info.backend)
            )));
        }

        log::info!(
            "{} backend succeeded with adapter: \"{}\" ({})",
            self.kind,
            info.name,
            backend_name(info.backend)
        );
        Ok(adapter)
    }

    /// Display strings of `adapter` as seen through backend model `kind`.
    pub fn adapter_info(adapter: &Adapter, kind: GraphicsBackendType) -> GraphicsAdapterInfo {
        let info = adapter.get_info();
        let driver = if info.driver_info.is_empty() {
            info.driver.clone()
        } else {
            format!("{} {}", info.driver, info.driver_info)
        };
        GraphicsAdapterInfo {
            vendor: format!("{:#06x}", info.vendor),
            renderer: info.name,
            api_version: format!("{} ({})", backend_name(info.backend), driver.trim()),
            backend_type: kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_name_function() {
        assert_eq!(backend_name(Backend::Vulkan), "Vulkan");
        assert_eq!(backend_name(Backend::Dx12), "DirectX 12");
        assert_eq!(backend_name(Backend::Gl), "OpenGL");
    }

    #[test]
    fn test_models_map_to_their_backends() {
        assert_eq!(backend_for(GraphicsBackendType::Immediate), Backend::Gl);
        assert_eq!(backend_for(GraphicsBackendType::CommandListV1), Backend::Dx12);
        assert_eq!(backend_for(GraphicsBackendType::CommandListV2), Backend::Vulkan);
        assert_eq!(backend_for(GraphicsBackendType::FenceBased), Backend::Vulkan);
        for kind in GraphicsBackendType::ALL {
            assert_eq!(backend_mask(backend_for(kind)).iter().count(), 1, "{kind}");
        }
    }
}
