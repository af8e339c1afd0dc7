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

//! Backend construction and selection with fallback.

use super::cmdlist::{CommandListV1Context, CommandListV2Context};
use super::fenced::FencedContext;
use super::immediate::ImmediateContext;
use super::wgpu::WgpuContext;
use quadra_core::platform::RenderWindowHandle;
use quadra_core::renderer::api::{BackendSelectionConfig, GraphicsBackendType, RenderSettings};
use quadra_core::renderer::{GraphicsContext, GraphicsContextFactory, RenderError};

/// Builds the wgpu context of each backend model: GL for `Immediate`, DX12 for
/// `CommandListV1` and Vulkan for `FenceBased` and `CommandListV2`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultContextFactory;

impl GraphicsContextFactory for DefaultContextFactory {
    fn create(
        &self,
        kind: GraphicsBackendType,
        window: RenderWindowHandle,
        settings: &RenderSettings,
    ) -> Result<Box<dyn GraphicsContext>, RenderError> {
        Ok(Box::new(WgpuContext::new(kind, window, settings)?))
    }
}

/// Builds one of the four contexts of the deterministic software device. Used where
/// no adapter can be assumed, such as headless tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct SoftContextFactory;

impl GraphicsContextFactory for SoftContextFactory {
    fn create(
        &self,
        kind: GraphicsBackendType,
        window: RenderWindowHandle,
        settings: &RenderSettings,
    ) -> Result<Box<dyn GraphicsContext>, RenderError> {
        Ok(match kind {
            GraphicsBackendType::Immediate => Box::new(ImmediateContext::new(window, settings)?),
            GraphicsBackendType::FenceBased => Box::new(FencedContext::new(window, settings)?),
            GraphicsBackendType::CommandListV1 => Box::new(CommandListV1Context::new(window, settings)?),
            GraphicsBackendType::CommandListV2 => Box::new(CommandListV2Context::new(window, settings)?),
        })
    }
}

/// Tries every candidate of `config` in order and returns the first context that
/// initializes.
pub fn select_backend(
    factory: &dyn GraphicsContextFactory,
    config: &BackendSelectionConfig,
    window: &RenderWindowHandle,
    settings: &RenderSettings,
) -> Result<Box<dyn GraphicsContext>, RenderError> {
    let candidates = config.candidates();
    log::info!("Starting backend selection process...");

    for &kind in &candidates {
        log::info!("Attempting to initialize {kind:?} backend...");
        match factory.create(kind, window.clone(), settings) {
            Ok(context) => {
                log::info!("Successfully selected {kind:?} backend ({})", context.adapter_info());
                return Ok(context);
            }
            Err(e) => {
                log::warn!("Failed to initialize {kind:?} backend: {e}");
            }
        }
    }

    Err(RenderError::InitializationFailed(format!(
        "All backend attempts failed. Attempted: {candidates:?}"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quadra_core::renderer::api::ContextState;
    use quadra_core::Canvas;
    use std::sync::Mutex;

    /// Fails every kind listed in `broken` and records what was attempted.
    struct FlakyFactory {
        broken: Vec<GraphicsBackendType>,
        attempts: Mutex<Vec<GraphicsBackendType>>,
    }

    impl GraphicsContextFactory for FlakyFactory {
        fn create(
            &self,
            kind: GraphicsBackendType,
            window: RenderWindowHandle,
            settings: &RenderSettings,
        ) -> Result<Box<dyn GraphicsContext>, RenderError> {
            self.attempts.lock().unwrap().push(kind);
            if self.broken.contains(&kind) {
                return Err(RenderError::InitializationFailed("no adapter".into()));
            }
            SoftContextFactory.create(kind, window, settings)
        }
    }

    #[test]
    fn test_soft_factory_builds_every_kind() {
        let window: RenderWindowHandle = Canvas::new(16, 16);
        for kind in GraphicsBackendType::ALL {
            let mut context = SoftContextFactory
                .create(kind, window.clone(), &RenderSettings::default())
                .unwrap();
            assert_eq!(context.kind(), kind);
            assert_eq!(context.state(), ContextState::Ready);
            assert_eq!(context.adapter_info().backend_type, kind);
            context.release();
            assert_eq!(context.state(), ContextState::Released);
        }
    }

    #[test]
    fn test_selection_falls_back_in_order() {
        let factory = FlakyFactory {
            broken: vec![GraphicsBackendType::CommandListV2, GraphicsBackendType::FenceBased],
            attempts: Mutex::new(Vec::new()),
        };
        let config = BackendSelectionConfig {
            preferred: GraphicsBackendType::CommandListV2,
            fallback_order: vec![GraphicsBackendType::FenceBased, GraphicsBackendType::Immediate],
        };
        let window: RenderWindowHandle = Canvas::new(16, 16);
        let context = select_backend(&factory, &config, &window, &RenderSettings::default()).unwrap();

        assert_eq!(context.kind(), GraphicsBackendType::Immediate);
        assert_eq!(
            *factory.attempts.lock().unwrap(),
            vec![
                GraphicsBackendType::CommandListV2,
                GraphicsBackendType::FenceBased,
                GraphicsBackendType::Immediate
            ]
        );
    }

    #[test]
    fn test_selection_fails_when_nothing_initializes() {
        let factory = FlakyFactory {
            broken: GraphicsBackendType::ALL.to_vec(),
            attempts: Mutex::new(Vec::new()),
        };
        let window: RenderWindowHandle = Canvas::new(16, 16);
        let result = select_backend(
            &factory,
            &BackendSelectionConfig::default(),
            &window,
            &RenderSettings::default(),
        );
        assert!(matches!(result, Err(RenderError::InitializationFailed(_))));
    }

    #[test]
    fn test_default_factory_reports_its_backend_or_fails_cleanly() {
        let window: RenderWindowHandle = Canvas::new(16, 16);
        for kind in GraphicsBackendType::ALL {
            match DefaultContextFactory.create(kind, window.clone(), &RenderSettings::default()) {
                Ok(mut context) => {
                    assert_eq!(context.kind(), kind);
                    assert_eq!(context.adapter_info().backend_type, kind);
                    context.release();
                }
                Err(err) => assert!(matches!(err, RenderError::InitializationFailed(_)), "{kind}: {err}"),
            }
        }
    }
}
