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

//! Per-frame command recording shared by every backend context.

use super::command::{Attachment, Command, PassTarget};
use super::raster::Viewport;
use super::store::TextureKey;
use quadra_core::math::Extent2D;
use quadra_core::renderer::api::{FramebufferId, TargetClass};

/// The off-screen target draws currently go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundTarget {
    pub framebuffer: FramebufferId,
    pub layer: u32,
    pub color: Option<Attachment>,
    pub depth: Option<Attachment>,
    pub class: TargetClass,
}

/// The commands of the frame being recorded and the pass bookkeeping around them.
///
/// The back-buffer pass is opened lazily and cleared only the first time, so a frame
/// may alternate between off-screen targets and the screen.
#[derive(Debug)]
pub struct FrameRecorder {
    image: TextureKey,
    screen: PassTarget,
    extent: Extent2D,
    top_row_first: bool,
    commands: Vec<Command>,
    screen_open: bool,
    screen_cleared: bool,
    bound: Option<BoundTarget>,
    /// Depth-only layers left in `DepthWrite` after their pass.
    pending_depth: Vec<(TextureKey, u32)>,
    draws: u32,
}

impl FrameRecorder {
    pub fn new(
        image: TextureKey,
        depth: TextureKey,
        extent: Extent2D,
        clear_color: [f32; 4],
        top_row_first: bool,
    ) -> Self {
        Self {
            image,
            screen: PassTarget {
                color: Some(Attachment {
                    texture: image,
                    layer: 0,
                }),
                depth: Some(Attachment {
                    texture: depth,
                    layer: 0,
                }),
                clear_color: Some(clear_color),
                clear_depth: Some(1.0),
            },
            extent,
            top_row_first,
            commands: Vec::new(),
            screen_open: false,
            screen_cleared: false,
            bound: None,
            pending_depth: Vec::new(),
            draws: 0,
        }
    }

    pub fn image(&self) -> TextureKey {
        self.image
    }

    pub fn bound(&self) -> Option<&BoundTarget> {
        self.bound.as_ref()
    }

    /// The class of target the next draw renders into.
    pub fn target_class(&self) -> TargetClass {
        self.bound.map_or(TargetClass::Screen, |b| b.class)
    }

    pub fn draws(&self) -> u32 {
        self.draws
    }

    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn push_draw(&mut self, commands: impl IntoIterator<Item = Command>) {
        self.commands.extend(commands);
        self.draws += 1;
    }

    /// Hands the recorded commands over to a backend that runs them right away.
    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.commands)
    }

    pub fn open_screen_pass(&mut self) {
        if self.screen_open {
            return;
        }
        let mut target = self.screen;
        if self.screen_cleared {
            target.clear_color = None;
            target.clear_depth = None;
        }
        self.commands.push(Command::BeginPass(target));
        self.commands.push(Command::SetViewport(Viewport::full(
            self.extent.width,
            self.extent.height,
            self.top_row_first,
        )));
        self.screen_open = true;
        self.screen_cleared = true;
    }

    pub fn close_screen_pass(&mut self) {
        if self.screen_open {
            self.commands.push(Command::EndPass);
            self.screen_open = false;
        }
    }

    pub fn begin_offscreen(&mut self, target: BoundTarget, clear: Option<[f32; 4]>, width: u32, height: u32) {
        self.close_screen_pass();
        self.commands.push(Command::BeginPass(PassTarget {
            color: target.color,
            depth: target.depth,
            clear_color: clear.filter(|_| target.color.is_some()),
            clear_depth: clear.map(|_| 1.0),
        }));
        self.commands.push(Command::SetViewport(Viewport::full(
            width,
            height,
            self.top_row_first,
        )));
        self.bound = Some(target);
    }

    pub fn end_offscreen(&mut self) -> Option<BoundTarget> {
        let bound = self.bound.take()?;
        self.commands.push(Command::EndPass);
        Some(bound)
    }

    pub fn defer_depth(&mut self, texture: TextureKey, layer: u32) {
        if !self.pending_depth.contains(&(texture, layer)) {
            self.pending_depth.push((texture, layer));
        }
    }

    /// Removes a deferred layer that is about to be written again. Returns whether
    /// it was pending.
    pub fn resume_depth(&mut self, texture: TextureKey, layer: u32) -> bool {
        let before = self.pending_depth.len();
        self.pending_depth.retain(|p| *p != (texture, layer));
        self.pending_depth.len() != before
    }

    /// Takes the deferred layers of `texture`.
    pub fn take_pending_of(&mut self, texture: TextureKey) -> Vec<u32> {
        let (taken, kept) = self
            .pending_depth
            .drain(..)
            .partition::<Vec<_>, _>(|(t, _)| *t == texture);
        self.pending_depth = kept;
        taken.into_iter().map(|(_, layer)| layer).collect()
    }

    pub fn take_all_pending(&mut self) -> Vec<(TextureKey, u32)> {
        std::mem::take(&mut self.pending_depth)
    }

    /// Closes the frame: the back buffer is cleared even if nothing was drawn to it.
    pub fn finish(mut self) -> Vec<Command> {
        self.open_screen_pass();
        self.close_screen_pass();
        self.commands
    }
}
