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

//! Synchronization objects: binary fences, timeline fences, semaphores and
//! descriptor pools/heaps whose reuse they guard.

use super::command::{DescriptorSet, HeapEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftFence {
    /// Signaled once by a submission, reset by the host.
    Binary { signaled: bool },
    /// Monotonic counter; a wait for `v` completes once `completed >= v`.
    Timeline { completed: u64 },
}

impl SoftFence {
    pub fn is_reached(&self, value: u64) -> bool {
        match *self {
            SoftFence::Binary { signaled } => signaled,
            SoftFence::Timeline { completed } => completed >= value,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftSemaphore {
    pub signaled: bool,
}

/// A pool of descriptor sets, reset as a whole once its frame has completed.
#[derive(Debug, Default)]
pub struct DescriptorPool {
    pub sets: Vec<DescriptorSet>,
    pub generation: u64,
}

impl DescriptorPool {
    pub fn allocate(&mut self, set: DescriptorSet) -> u32 {
        self.sets.push(set);
        (self.sets.len() - 1) as u32
    }

    pub fn reset(&mut self) {
        self.sets.clear();
        self.generation += 1;
    }
}

/// A descriptor heap. Per-frame heaps are split into one region per frame slot;
/// persistent heaps hand out individual entries through a free list.
#[derive(Debug)]
pub struct DescriptorHeap {
    pub entries: Vec<Option<HeapEntry>>,
    region_size: u32,
    cursors: Vec<u32>,
    generations: Vec<u64>,
    free: Vec<u32>,
}

impl DescriptorHeap {
    pub fn per_frame(regions: usize, region_size: u32) -> Self {
        Self {
            entries: vec![None; regions * region_size as usize],
            region_size,
            cursors: vec![0; regions],
            generations: vec![0; regions],
            free: Vec::new(),
        }
    }

    pub fn persistent() -> Self {
        Self {
            entries: Vec::new(),
            region_size: 0,
            cursors: Vec::new(),
            generations: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Writes `entries` contiguously into `slot`'s region.
    pub fn write_region(&mut self, slot: usize, entries: &[HeapEntry]) -> Option<(u32, u64)> {
        let cursor = *self.cursors.get(slot)?;
        let len = entries.len() as u32;
        if cursor + len > self.region_size {
            return None;
        }
        let offset = slot as u32 * self.region_size + cursor;
        for (i, entry) in entries.iter().enumerate() {
            self.entries[offset as usize + i] = Some(*entry);
        }
        self.cursors[slot] = cursor + len;
        Some((offset, self.generations[slot]))
    }

    pub fn region_generation(&self, slot: usize) -> Option<u64> {
        self.generations.get(slot).copied()
    }

    /// Rewinds `slot`'s region; references recorded before the reset become stale.
    pub fn reset_region(&mut self, slot: usize) {
        if let (Some(cursor), Some(generation)) =
            (self.cursors.get_mut(slot), self.generations.get_mut(slot))
        {
            *cursor = 0;
            *generation += 1;
        }
    }

    pub fn allocate(&mut self, entry: HeapEntry) -> u32 {
        match self.free.pop() {
            Some(index) => {
                self.entries[index as usize] = Some(entry);
                index
            }
            None => {
                self.entries.push(Some(entry));
                (self.entries.len() - 1) as u32
            }
        }
    }

    pub fn release(&mut self, index: u32) {
        if let Some(entry) = self.entries.get_mut(index as usize) {
            if entry.take().is_some() {
                self.free.push(index);
            }
        }
    }

    pub fn get(&self, index: u32) -> Option<HeapEntry> {
        self.entries.get(index as usize).copied().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graphics::soft::store::TextureKey;
    use slotmap::KeyData;

    fn texture(n: u64) -> HeapEntry {
        HeapEntry::Texture(TextureKey::from(KeyData::from_ffi(n)))
    }

    #[test]
    fn test_regions_are_isolated_and_reset_bumps_generation() {
        let mut heap = DescriptorHeap::per_frame(2, 4);
        let (offset, generation) = heap.write_region(1, &[texture(1), texture(2)]).unwrap();
        assert_eq!((offset, generation), (4, 0));
        assert!(heap.write_region(1, &[texture(3); 3]).is_none());

        heap.reset_region(1);
        assert_eq!(heap.region_generation(1), Some(1));
        assert_eq!(heap.write_region(1, &[texture(3)]).unwrap(), (4, 1));
        assert_eq!(heap.write_region(0, &[texture(4)]).unwrap(), (0, 0));
    }

    #[test]
    fn test_persistent_entries_are_recycled() {
        let mut heap = DescriptorHeap::persistent();
        let a = heap.allocate(texture(1));
        let b = heap.allocate(texture(2));
        heap.release(a);
        assert_eq!(heap.get(a), None);
        assert_eq!(heap.allocate(texture(3)), a);
        assert_eq!(heap.get(b), Some(texture(2)));
    }

    #[test]
    fn test_timeline_fences_compare_values() {
        let fence = SoftFence::Timeline { completed: 3 };
        assert!(fence.is_reached(3));
        assert!(!fence.is_reached(4));
        assert!(SoftFence::Binary { signaled: true }.is_reached(0));
    }
}
