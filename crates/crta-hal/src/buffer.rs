//! Shared buffers and the buffer-manager interface.

use std::sync::{Arc, PoisonError, RwLock};

use crta_types::{BufferRef, CrtaError};

/// Word-addressed memory shared between the driver and the coprocessor.
///
/// Cloning is cheap; all clones refer to the same storage.
#[derive(Debug, Clone, Default)]
pub struct SharedMem(Arc<RwLock<Vec<u32>>>);

impl SharedMem {
    pub fn zeroed(words: usize) -> Self {
        Self::from_words(vec![0; words])
    }

    pub fn from_words(words: Vec<u32>) -> Self {
        Self(Arc::new(RwLock::new(words)))
    }

    pub fn len(&self) -> usize {
        self.with_words(|w| w.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn with_words<R>(&self, f: impl FnOnce(&[u32]) -> R) -> R {
        let guard = self.0.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    pub fn with_words_mut<R>(&self, f: impl FnOnce(&mut [u32]) -> R) -> R {
        let mut guard = self.0.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Vec<u32> {
        self.with_words(|w| w.to_vec())
    }

    /// Overwrite the buffer from `offset` with `data`.
    ///
    /// # Errors
    ///
    /// Returns [`CrtaError::Buffer`] when `data` does not fit.
    pub fn write(&self, offset: usize, data: &[u32]) -> Result<(), CrtaError> {
        self.with_words_mut(|w| {
            let end = offset
                .checked_add(data.len())
                .filter(|&end| end <= w.len())
                .ok_or_else(|| {
                    CrtaError::Buffer(format!(
                        "write of {} words at {offset} exceeds {} words",
                        data.len(),
                        w.len()
                    ))
                })?;
            w[offset..end].copy_from_slice(data);
            Ok(())
        })
    }
}

/// A shared buffer resolved by the [`BufferManager`].
#[derive(Debug, Clone)]
pub struct BufferInfo {
    pub buffer: BufferRef,
    /// Device-virtual address the coprocessor uses.
    pub dva: u64,
    /// Size in bytes.
    pub size: u32,
    /// Local view of the buffer contents.
    pub mem: SharedMem,
}

/// Resolves buffer references and keeps CPU caches coherent with the device.
pub trait BufferManager: Send + Sync {
    /// Look up the buffer identified by `buffer`.
    ///
    /// # Errors
    ///
    /// Returns [`CrtaError::Buffer`] when no such buffer exists.
    fn resolve(&self, buffer: BufferRef) -> Result<BufferInfo, CrtaError>;

    /// Make CPU writes to `buf` visible to the coprocessor.
    fn sync_for_device(&self, buf: &BufferInfo) -> Result<(), CrtaError>;

    /// Make coprocessor writes to `buf` visible to the CPU.
    fn sync_for_cpu(&self, buf: &BufferInfo) -> Result<(), CrtaError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_storage() {
        let mem = SharedMem::zeroed(4);
        let other = mem.clone();
        other.write(1, &[7, 8]).unwrap();
        assert_eq!(mem.snapshot(), vec![0, 7, 8, 0]);
    }

    #[test]
    fn write_past_end_is_rejected() {
        let mem = SharedMem::zeroed(2);
        assert!(matches!(mem.write(1, &[1, 2]), Err(CrtaError::Buffer(_))));
        assert!(matches!(mem.write(usize::MAX, &[1]), Err(CrtaError::Buffer(_))));
        assert_eq!(mem.snapshot(), vec![0, 0]);
    }
}
