//! Live-handle accounting

use super::HandleTag;
use parking_lot::Mutex;

/// Per-tag count of owned handles that have been created and not yet released
#[derive(Debug, Default)]
pub struct HandleRegistry {
    live: Mutex<[usize; HandleTag::COUNT]>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn live_count(&self, tag: HandleTag) -> usize {
        self.live.lock()[tag.index()]
    }

    pub fn total_live(&self) -> usize {
        self.live.lock().iter().sum()
    }

    /// Non-zero counts, in tag order
    pub fn snapshot(&self) -> Vec<(HandleTag, usize)> {
        let live = self.live.lock();
        HandleTag::ALL
            .iter()
            .map(|&tag| (tag, live[tag.index()]))
            .filter(|&(_, n)| n > 0)
            .collect()
    }

    pub(crate) fn note_created(&self, tag: HandleTag) {
        self.live.lock()[tag.index()] += 1;
    }

    pub(crate) fn note_released(&self, tag: HandleTag) {
        let mut live = self.live.lock();
        let slot = &mut live[tag.index()];
        *slot = slot.saturating_sub(1);
    }
}
