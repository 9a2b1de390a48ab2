use std::collections::VecDeque;

use crate::ClipId;

/// Bounded record of the clips used by the most recent segments.
#[derive(Debug, Clone)]
pub(crate) struct RecentClips {
    window: VecDeque<ClipId>,
    capacity: usize,
    previous: Option<ClipId>,
}

impl RecentClips {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity,
            previous: None,
        }
    }

    pub(crate) fn push(&mut self, clip: ClipId) {
        self.previous = Some(clip);
        if self.capacity == 0 {
            return;
        }
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(clip);
    }

    pub(crate) fn contains(&self, clip: ClipId) -> bool {
        self.window.contains(&clip)
    }

    /// The clip of the immediately preceding segment, tracked even when the
    /// window itself is disabled.
    pub(crate) fn previous(&self) -> Option<ClipId> {
        self.previous
    }
}
