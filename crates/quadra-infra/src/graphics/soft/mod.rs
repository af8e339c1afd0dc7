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

//! The software device every backend model runs on.

pub mod command;
pub mod context;
pub mod device;
pub mod executor;
pub mod gpu;
pub mod image;
pub mod programs;
pub mod queue;
pub mod raster;
pub mod recorder;
pub mod sampler;
pub mod store;
pub mod swapchain;
pub mod sync;

pub use self::context::{BackendModel, SoftContext};
pub use self::device::SoftDevice;
