//! [`IndexAllocator`] – hands out small unique integers for child names.
//!
//! The lowest free index is always returned first and an index is only
//! reused after it has been freed.  The allocator carries its own lock and
//! is safe to share between devices of different peer groups.

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use facet_types::FacetError;
use parking_lot::Mutex;
use tracing::warn;

/// Exclusive upper bound used by [`IndexAllocator::new`].
pub const DEFAULT_INDEX_LIMIT: u32 = i32::MAX as u32;

static CHILD_INDICES: LazyLock<Arc<IndexAllocator>> =
    LazyLock::new(|| Arc::new(IndexAllocator::new()));

/// The process-wide allocator.
pub fn global() -> Arc<IndexAllocator> {
    CHILD_INDICES.clone()
}

/// Allocate from the process-wide allocator.
///
/// # Errors
///
/// Returns [`FacetError::ResourceExhausted`] when every index is in use.
pub fn alloc_index() -> Result<u32, FacetError> {
    CHILD_INDICES.alloc()
}

/// Return `index` to the process-wide allocator.
pub fn free_index(index: u32) {
    CHILD_INDICES.free(index);
}

/// Allocation set of child indices.
///
/// # Example
///
/// ```
/// use facet_kernel::ida::IndexAllocator;
///
/// let ida = IndexAllocator::with_limit(2);
/// assert_eq!(ida.alloc().unwrap(), 0);
/// assert_eq!(ida.alloc().unwrap(), 1);
/// assert!(ida.alloc().is_err());
///
/// ida.free(0);
/// assert_eq!(ida.alloc().unwrap(), 0);
/// ```
pub struct IndexAllocator {
    limit: u32,
    in_use: Mutex<BTreeSet<u32>>,
}

impl Default for IndexAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IndexAllocator {
    pub fn new() -> Self {
        Self::with_limit(DEFAULT_INDEX_LIMIT)
    }

    /// Allocator issuing indices in `0..limit`.
    pub fn with_limit(limit: u32) -> Self {
        Self {
            limit,
            in_use: Mutex::new(BTreeSet::new()),
        }
    }

    /// Take the lowest free index.
    ///
    /// # Errors
    ///
    /// Returns [`FacetError::ResourceExhausted`] when `0..limit` is fully
    /// allocated.
    pub fn alloc(&self) -> Result<u32, FacetError> {
        let mut in_use = self.in_use.lock();
        let mut candidate = 0u32;
        for &used in in_use.iter() {
            if used != candidate {
                break;
            }
            candidate += 1;
        }
        if candidate >= self.limit {
            return Err(FacetError::ResourceExhausted {
                resource: format!("child index space (limit {})", self.limit),
            });
        }
        in_use.insert(candidate);
        Ok(candidate)
    }

    /// Return `index`.  Freeing an index that is not allocated is ignored.
    pub fn free(&self, index: u32) {
        if !self.in_use.lock().remove(&index) {
            warn!(index, "freeing child index that is not allocated");
        }
    }

    pub fn is_allocated(&self, index: u32) -> bool {
        self.in_use.lock().contains(&index)
    }

    /// Number of indices currently allocated.
    pub fn in_use(&self) -> usize {
        self.in_use.lock().len()
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn lowest_free_index_first() {
        let ida = IndexAllocator::new();
        let a = ida.alloc().unwrap();
        let b = ida.alloc().unwrap();
        let c = ida.alloc().unwrap();
        assert_eq!((a, b, c), (0, 1, 2));

        ida.free(1);
        assert!(!ida.is_allocated(1));
        assert_eq!(ida.alloc().unwrap(), 1);
        assert_eq!(ida.alloc().unwrap(), 3);
    }

    #[test]
    fn exhausted_at_limit() {
        let ida = IndexAllocator::with_limit(1);
        ida.alloc().unwrap();
        assert!(matches!(
            ida.alloc(),
            Err(FacetError::ResourceExhausted { .. })
        ));
        assert_eq!(ida.in_use(), 1);
    }

    #[test]
    fn double_free_is_ignored() {
        let ida = IndexAllocator::new();
        let i = ida.alloc().unwrap();
        ida.free(i);
        ida.free(i);
        assert_eq!(ida.in_use(), 0);
        assert_eq!(ida.alloc().unwrap(), i);
    }

    #[test]
    fn concurrent_allocations_are_unique() {
        let ida = Arc::new(IndexAllocator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ida = ida.clone();
                thread::spawn(move || (0..50).map(|_| ida.alloc().unwrap()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for h in handles {
            for idx in h.join().unwrap() {
                assert!(seen.insert(idx), "index {idx} issued twice");
            }
        }
        assert_eq!(seen.len(), 400);
        assert_eq!(ida.in_use(), 400);
    }

    #[test]
    fn global_allocator_roundtrip() {
        let idx = alloc_index().unwrap();
        assert!(global().is_allocated(idx));
        free_index(idx);
    }
}
