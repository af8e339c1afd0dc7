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

//! Generation-checked keys for every object the software device owns.
//!
//! Public ids (`BufferId`, `TextureId`, ...) are the FFI form of these keys, so a
//! destroyed id never aliases a newer object that reused its slot.

use quadra_core::renderer::api::{
    BufferId, FramebufferId, PipelineId, SamplerId, ShaderModuleId, TextureId,
};
use slotmap::{new_key_type, Key, KeyData};

new_key_type! {
    pub struct BufferKey;
    pub struct TextureKey;
    pub struct SamplerKey;
    pub struct ModuleKey;
    pub struct PipelineKey;
    pub struct FramebufferKey;
    pub struct FenceKey;
    pub struct SemaphoreKey;
    pub struct PoolKey;
    pub struct HeapKey;
}

/// Converts between a store key and its public id.
pub trait PublicId: Sized {
    type Key: Key;

    fn from_key(key: Self::Key) -> Self;
    fn key(self) -> Self::Key;
}

macro_rules! public_id {
    ($id:ident => $key:ident) => {
        impl PublicId for $id {
            type Key = $key;

            fn from_key(key: $key) -> Self {
                $id(key.data().as_ffi())
            }

            fn key(self) -> $key {
                KeyData::from_ffi(self.0).into()
            }
        }
    };
}

public_id!(BufferId => BufferKey);
public_id!(TextureId => TextureKey);
public_id!(SamplerId => SamplerKey);
public_id!(ShaderModuleId => ModuleKey);
public_id!(PipelineId => PipelineKey);
public_id!(FramebufferId => FramebufferKey);

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn test_stale_ids_do_not_alias_reused_slots() {
        let mut map: SlotMap<BufferKey, u32> = SlotMap::with_key();
        let first = BufferId::from_key(map.insert(1));
        map.remove(first.key());
        let second = BufferId::from_key(map.insert(2));

        assert_ne!(first, second);
        assert!(map.get(first.key()).is_none());
        assert_eq!(map.get(second.key()), Some(&2));
    }
}
