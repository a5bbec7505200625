//! DynamicConfig handles for live-updatable config.
//!
//! Default uses `ArcSwap` for lock-free reads; feature `adaptive-rwlock` can
//! switch to RwLock if desired. Both backends make `try_update` an atomic
//! read-modify-write: two concurrent updates never overwrite each other's
//! result.

use std::sync::Arc;

#[cfg(feature = "adaptive-rwlock")]
use std::sync::RwLock;

#[cfg(not(feature = "adaptive-rwlock"))]
use arc_swap::ArcSwap;

/// `DynamicConfig<T>` gives cheap reads and controlled updates for shared config.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    #[cfg(not(feature = "adaptive-rwlock"))]
    inner: Arc<ArcSwap<T>>,
    #[cfg(feature = "adaptive-rwlock")]
    inner: Arc<RwLock<Arc<T>>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T: Default> Default for DynamicConfig<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> DynamicConfig<T> {
    /// Create a new `DynamicConfig` with the given initial value.
    pub fn new(value: T) -> Self {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            Self { inner: Arc::new(RwLock::new(Arc::new(value))) }
        }
    }

    /// Snapshot the current value (cheap clone of Arc).
    #[cfg(not(feature = "adaptive-rwlock"))]
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    /// Snapshot the current value (cheap clone of Arc).
    #[cfg(feature = "adaptive-rwlock")]
    pub fn get(&self) -> Arc<T> {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Replace the value entirely.
    pub fn set(&self, value: T) {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            self.inner.store(Arc::new(value));
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            let mut guard = match self.inner.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = Arc::new(value);
        }
    }

    /// Fallible atomic read-modify-write.
    ///
    /// With the `ArcSwap` backend the closure may run more than once when another
    /// writer races this one; it must be free of side effects. If `f` returns an error the stored value is left untouched and the error is
    /// returned. Otherwise the new value is installed only if nothing else was
    /// installed since `f` observed the current one; on conflict `f` is retried
    /// against the fresh value.
    pub fn try_update<F, E>(&self, f: F) -> Result<Arc<T>, E>
    where
        F: Fn(&T) -> Result<T, E>,
    {
        #[cfg(not(feature = "adaptive-rwlock"))]
        {
            let mut current = self.inner.load_full();
            loop {
                let next = Arc::new(f(&current)?);
                let prev = self.inner.compare_and_swap(&current, next.clone());
                if Arc::ptr_eq(&*prev, &current) {
                    return Ok(next);
                }
                current = arc_swap::Guard::into_inner(prev);
            }
        }
        #[cfg(feature = "adaptive-rwlock")]
        {
            let mut guard = match self.inner.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let next = Arc::new(f(&guard)?);
            *guard = next.clone();
            Ok(next)
        }
    }
}
