//! Strong reference token for managed callables
//!
//! A `Retained` is one counted reference the bridge holds on a callable. Creating
//! one increments the callable's strong count and dropping it decrements it.

use std::fmt;
use std::sync::Arc;

pub struct Retained<T: ?Sized> {
    inner: Arc<T>,
}

impl<T: ?Sized> Retained<T> {
    /// Take one reference on `target`
    pub fn retain(target: &Arc<T>) -> Self {
        Self {
            inner: Arc::clone(target),
        }
    }

    pub fn get(&self) -> &T {
        &self.inner
    }

    /// Transient reference for the duration of one invocation
    pub fn share(&self) -> Arc<T> {
        Arc::clone(&self.inner)
    }

    /// Current number of strong references on `target`
    pub fn retain_count(target: &Arc<T>) -> usize {
        Arc::strong_count(target)
    }
}

impl<T: ?Sized> fmt::Debug for Retained<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Retained")
            .field("strong", &Arc::strong_count(&self.inner))
            .finish()
    }
}
