//! Parse-cache side channel
//!
//! ContentObject and Interest handles carry a cache of the engine's structural
//! parse of their bytes. The slot exists from handle creation, is filled on first
//! structured access and is never recomputed afterwards.

use std::ops::Range;
use std::sync::OnceLock;

/// Header offsets and component index of an encoded content object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedContent {
    /// Encoded name
    pub name: Range<usize>,
    /// Payload bytes
    pub payload: Range<usize>,
    /// End of the encoded object
    pub end: usize,
    /// Name components
    pub components: Vec<Range<usize>>,
}

/// Header offsets and component index of an encoded interest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedInterest {
    /// Encoded name
    pub name: Range<usize>,
    /// End of the encoded interest
    pub end: usize,
    /// Name components
    pub components: Vec<Range<usize>>,
}

/// Cached parse result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parsed {
    Content(ParsedContent),
    Interest(ParsedInterest),
}

/// Lazily filled parse cache
#[derive(Debug, Default)]
pub struct ParseContext {
    slot: OnceLock<Parsed>,
}

impl ParseContext {
    pub fn new() -> Self {
        Self {
            slot: OnceLock::new(),
        }
    }

    /// Cached value, if already computed
    pub fn get(&self) -> Option<&Parsed> {
        self.slot.get()
    }

    /// Return the cached value, computing it with `parse` when absent.
    ///
    /// A failed parse leaves the slot empty.
    pub fn get_or_try_init<E>(&self, parse: impl FnOnce() -> Result<Parsed, E>) -> Result<&Parsed, E> {
        if let Some(parsed) = self.slot.get() {
            return Ok(parsed);
        }
        let parsed = parse()?;
        Ok(self.slot.get_or_init(|| parsed))
    }

    pub fn is_filled(&self) -> bool {
        self.slot.get().is_some()
    }
}
