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

//! Device memory accounting against an optional budget.

use quadra_core::renderer::api::{mip_extent, TextureDescriptor};
use quadra_core::renderer::ResourceError;

/// Bytes of device memory the full mip chain of `descriptor` occupies.
/// Saturates at `u64::MAX`, which no budget can satisfy.
pub fn texture_bytes(descriptor: &TextureDescriptor) -> u64 {
    let bpp = descriptor.format.bytes_per_pixel() as u64;
    let layers = descriptor.size.depth_or_array_layers.max(1) as u64;
    (0..descriptor.mip_level_count.max(1))
        .map(|mip| {
            let (w, h) = mip_extent(descriptor.size.width, descriptor.size.height, mip);
            (w as u64 * h as u64).saturating_mul(bpp).saturating_mul(layers)
        })
        .fold(0, u64::saturating_add)
}

#[derive(Debug, Default)]
pub struct MemoryTracker {
    budget: Option<u64>,
    allocated: u64,
    peak: u64,
}

impl MemoryTracker {
    pub fn new(budget: Option<u64>) -> Self {
        Self {
            budget,
            ..Self::default()
        }
    }

    /// Accounts for `bytes`, failing when the budget would be exceeded.
    pub fn reserve(&mut self, bytes: u64) -> Result<(), ResourceError> {
        if let Some(budget) = self.budget {
            let available = budget.saturating_sub(self.allocated);
            if bytes > available {
                return Err(ResourceError::OutOfMemory {
                    requested: bytes,
                    available,
                });
            }
        }
        self.allocated += bytes;
        self.peak = self.peak.max(self.allocated);
        Ok(())
    }

    pub fn release(&mut self, bytes: u64) {
        self.allocated = self.allocated.saturating_sub(bytes);
    }

    pub fn allocated(&self) -> u64 {
        self.allocated
    }

    pub fn peak(&self) -> u64 {
        self.peak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_is_enforced() {
        let mut memory = MemoryTracker::new(Some(100));
        memory.reserve(60).unwrap();
        let err = memory.reserve(50).unwrap_err();
        assert_eq!(
            err,
            ResourceError::OutOfMemory {
                requested: 50,
                available: 40
            }
        );
        memory.release(60);
        memory.reserve(100).unwrap();
        assert_eq!(memory.peak(), 100);
    }
}
