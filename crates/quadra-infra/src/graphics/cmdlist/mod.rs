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

//! Command-list backends: pipelines are baked up front and frames are paced with a
//! single timeline fence. The two generations differ in how descriptors live.

mod common;
pub mod v1;
pub mod v2;

pub use self::v1::{CommandListV1Context, CommandListV1Model};
pub use self::v2::{CommandListV2Context, CommandListV2Model};
