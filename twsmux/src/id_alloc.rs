// twsmux/src/id_alloc.rs
// Request id allocation, one sequence per category band.

use crate::base::RequestId;
use crate::category::{RequestCategory, BAND_WIDTH};
use log::trace;
use std::sync::atomic::{AtomicI32, Ordering};

/// Hands out request ids that are unique across all categories.
///
/// Each category has its own atomic sequence which is added to the category
/// offset. Ids are never reclaimed: a late reply for a finished request must
/// never be routed to a newer request.
///
/// The allocator is shared by passing an `Arc<RequestIdAllocator>` to every
/// manager that talks over the same connection.
#[derive(Debug)]
pub struct RequestIdAllocator {
  sequences: [AtomicI32; RequestCategory::ALL.len()],
}

impl Default for RequestIdAllocator {
  fn default() -> Self {
    Self::new()
  }
}

impl RequestIdAllocator {
  /// Create an allocator whose first id in every category is `offset + 1`.
  pub fn new() -> Self {
    Self::starting_at(1)
  }

  /// Create an allocator whose first id in every category is `offset + first_seq`.
  pub fn starting_at(first_seq: i32) -> Self {
    assert!(first_seq >= 0 && first_seq < BAND_WIDTH, "first sequence {} outside band", first_seq);
    RequestIdAllocator {
      sequences: std::array::from_fn(|_| AtomicI32::new(first_seq)),
    }
  }

  /// Allocate the next id for `category`.
  ///
  /// # Panics
  /// If the category's band is exhausted. Bands are wide enough that this
  /// indicates a runaway caller rather than normal load.
  pub fn next(&self, category: RequestCategory) -> RequestId {
    let seq = self.sequences[category.index()].fetch_add(1, Ordering::SeqCst);
    assert!(seq < BAND_WIDTH, "request id band for {} exhausted", category);
    let id = category.offset() + seq;
    trace!("Allocated request ID {} for {}", id, category);
    id
  }

  /// The id the next call to `next(category)` would return.
  pub fn peek_next(&self, category: RequestCategory) -> RequestId {
    category.offset() + self.sequences[category.index()].load(Ordering::SeqCst)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashSet;
  use std::sync::Arc;
  use std::thread;

  #[test]
  fn test_first_ids() {
    let alloc = RequestIdAllocator::new();
    assert_eq!(alloc.next(RequestCategory::ContractDetails), 10_000_001);
    assert_eq!(alloc.next(RequestCategory::ContractDetails), 10_000_002);
    assert_eq!(alloc.next(RequestCategory::HistoricalData), 20_000_001);
    assert_eq!(alloc.peek_next(RequestCategory::HistoricalData), 20_000_002);
  }

  #[test]
  fn test_hundred_thousand_allocations_stay_in_band() {
    let alloc = RequestIdAllocator::new();
    for category in RequestCategory::ALL {
      for _ in 0..100_000 {
        let id = alloc.next(category);
        assert_eq!(RequestCategory::of(id), Some(category), "id {} escaped its band", id);
        for other in RequestCategory::ALL.iter().filter(|c| **c != category) {
          assert!(!other.contains(id));
        }
      }
    }
  }

  #[test]
  fn test_concurrent_allocations_are_unique() {
    let alloc = Arc::new(RequestIdAllocator::new());
    let handles: Vec<_> = (0..8)
      .map(|i| {
        let alloc = Arc::clone(&alloc);
        thread::spawn(move || {
          let category = if i % 2 == 0 { RequestCategory::HistoricalData } else { RequestCategory::RealTimeBars };
          (0..1_000).map(|_| alloc.next(category)).collect::<Vec<_>>()
        })
      })
      .collect();

    let mut seen = HashSet::new();
    for h in handles {
      for id in h.join().unwrap() {
        assert!(seen.insert(id), "duplicate id {}", id);
      }
    }
    assert_eq!(seen.len(), 8_000);
  }

  #[test]
  #[should_panic(expected = "exhausted")]
  fn test_exhausted_band_fails_fast() {
    let alloc = RequestIdAllocator::starting_at(BAND_WIDTH - 1);
    alloc.next(RequestCategory::Ticks);
    alloc.next(RequestCategory::Ticks);
  }
}
