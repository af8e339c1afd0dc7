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

use std::fmt::Debug;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

/// A shared, thread-safe handle to a presentation window.
pub type RenderWindowHandle = Arc<dyn RenderWindow>;

/// A trait that abstracts the presentation surface a backend draws into.
///
/// Any windowing layer (or a headless canvas) can implement this trait. Backends
/// only query its size; a size that no longer matches the swapchain is how a
/// context detects that its surface went stale.
pub trait RenderWindow: Send + Sync + Debug {
    /// Returns the physical dimensions (width, height) of the drawable area.
    fn inner_size(&self) -> (u32, u32);

    /// Returns the unique identifier for the window.
    fn id(&self) -> u64;
}

static NEXT_CANVAS_ID: AtomicU64 = AtomicU64::new(1);

/// A headless drawable area whose size can be changed from any thread.
#[derive(Debug)]
pub struct Canvas {
    id: u64,
    width: AtomicU32,
    height: AtomicU32,
}

impl Canvas {
    /// Creates a new canvas and returns it behind an `Arc`.
    pub fn new(width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_CANVAS_ID.fetch_add(1, Ordering::Relaxed),
            width: AtomicU32::new(width),
            height: AtomicU32::new(height),
        })
    }

    /// Changes the canvas size. Contexts notice the change on their next frame.
    pub fn set_size(&self, width: u32, height: u32) {
        self.width.store(width, Ordering::Release);
        self.height.store(height, Ordering::Release);
    }
}

impl RenderWindow for Canvas {
    fn inner_size(&self) -> (u32, u32) {
        (
            self.width.load(Ordering::Acquire),
            self.height.load(Ordering::Acquire),
        )
    }

    fn id(&self) -> u64 {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canvas_ids_are_unique_and_size_is_shared() {
        let a = Canvas::new(64, 32);
        let b = Canvas::new(64, 32);
        assert_ne!(a.id(), b.id());

        let handle: RenderWindowHandle = a.clone();
        a.set_size(10, 20);
        assert_eq!(handle.inner_size(), (10, 20));
    }
}
