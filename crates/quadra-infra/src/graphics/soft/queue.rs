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

//! Ordered GPU submissions awaiting execution.

use super::command::Command;
use super::store::{FenceKey, SemaphoreKey};
use std::collections::VecDeque;

/// The fence a submission signals when it completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceSignal {
    Binary(FenceKey),
    Timeline(FenceKey, u64),
}

/// One batch of commands with its synchronization.
#[derive(Debug, Clone)]
pub struct Submission {
    pub label: &'static str,
    pub commands: Vec<Command>,
    pub waits: Vec<SemaphoreKey>,
    pub signals: Vec<SemaphoreKey>,
    pub fence: Option<FenceSignal>,
}

impl Submission {
    pub fn new(label: &'static str, commands: Vec<Command>) -> Self {
        Self {
            label,
            commands,
            waits: Vec::new(),
            signals: Vec::new(),
            fence: None,
        }
    }

    pub fn wait(mut self, semaphore: SemaphoreKey) -> Self {
        self.waits.push(semaphore);
        self
    }

    pub fn signal(mut self, semaphore: SemaphoreKey) -> Self {
        self.signals.push(semaphore);
        self
    }

    pub fn with_fence(mut self, fence: FenceSignal) -> Self {
        self.fence = Some(fence);
        self
    }
}

/// The device queue. Work runs in submission order, but only when something on the
/// host needs its results.
#[derive(Debug, Default)]
pub struct SubmissionQueue {
    pending: VecDeque<Submission>,
    submitted: u64,
    completed: u64,
}

impl SubmissionQueue {
    pub fn push(&mut self, submission: Submission) {
        log::trace!(
            "Queued submission '{}' ({} commands)",
            submission.label,
            submission.commands.len()
        );
        self.submitted += 1;
        self.pending.push_back(submission);
    }

    pub fn pop(&mut self) -> Option<Submission> {
        let next = self.pending.pop_front();
        if next.is_some() {
            self.completed += 1;
        }
        next
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn completed(&self) -> u64 {
        self.completed
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }
}
