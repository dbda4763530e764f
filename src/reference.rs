//! Shared read-only reference data.

use std::sync::{Arc, PoisonError, RwLock};

/// A value shared across requests.
///
/// Readers take an `Arc` snapshot that stays valid for as long as they hold
/// it. Writers publish a fully built replacement; there is no way to mutate
/// the current value in place.
#[derive(Debug)]
pub struct Reference<T> {
    current: RwLock<Arc<T>>,
}

impl<T> Reference<T> {
    pub fn new(value: T) -> Self {
        Self {
            current: RwLock::new(Arc::new(value)),
        }
    }

    /// The current snapshot.
    pub fn load(&self) -> Arc<T> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Publish `value`, returning the snapshot it replaced.
    pub fn replace(&self, value: T) -> Arc<T> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, Arc::new(value))
    }
}

impl<T: Default> Default for Reference<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}
