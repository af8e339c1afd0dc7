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

use crate::platform::RenderWindowHandle;
use crate::renderer::api::{GraphicsBackendType, RenderSettings};
use crate::renderer::error::RenderError;
use crate::renderer::traits::GraphicsContext;

/// Builds initialized contexts. The render engine is given a factory so backend
/// construction can be substituted (a test can make any backend fail to initialize).
pub trait GraphicsContextFactory: Send + Sync {
    /// Creates a context of `kind` presenting to `window`, in the `Ready` state.
    fn create(
        &self,
        kind: GraphicsBackendType,
        window: RenderWindowHandle,
        settings: &RenderSettings,
    ) -> Result<Box<dyn GraphicsContext>, RenderError>;
}
