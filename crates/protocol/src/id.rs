//! Command id allocation

use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic command-id source
///
/// Ids start at 1 and are never reused within a connection's lifetime.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next: AtomicU64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
        }
    }

    /// Allocate the next id; the first call returns 1
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_id_is_one() {
        let ids = IdAllocator::new();
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
        assert_eq!(ids.next(), 3);
    }

    #[test]
    fn test_strictly_increasing_across_threads() {
        use std::sync::Arc;

        let ids = Arc::new(IdAllocator::new());
        let mut handles = Vec::new();

        for _ in 0..4 {
            let ids = ids.clone();
            handles.push(std::thread::spawn(move || {
                (0..250).map(|_| ids.next()).collect::<Vec<_>>()
            }));
        }

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();

        // 4 threads x 250 allocations, no duplicates
        assert_eq!(all.len(), 1000);
        assert_eq!(*all.first().unwrap(), 1);
        assert_eq!(*all.last().unwrap(), 1000);
    }
}
