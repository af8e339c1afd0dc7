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

//! # Quadra Infra
//!
//! Concrete implementations of the `quadra-core` graphics contracts. The four backend
//! models (immediate, fence-based and two command-list generations) run on wgpu
//! adapters; a deterministic software device implements the same models for
//! headless tests.

pub mod graphics;

pub use graphics::{
    select_backend, CommandListV1Context, CommandListV2Context, DefaultContextFactory,
    FencedContext, ImmediateContext, SoftContextFactory, WgpuContext, WgpuDevice,
};
