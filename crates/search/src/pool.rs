//! Set intersection on a dedicated worker pool.

use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::trace;

use crate::error::{ErrorKind, Result};
use exn::ResultExt;

/// Worker threads of the intersection pool.
pub const INTERSECTION_WORKERS: usize = 4;

/// A sorted, deduplicated id set shared between the request task and the
/// pool.
pub type IdSet = Arc<[u64]>;

/// Runs intersections off the async runtime, so a large intersection never
/// stalls the tasks serving other queries.
pub struct IntersectionPool {
    pool: rayon::ThreadPool,
}

impl IntersectionPool {
    pub fn new(workers: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|index| format!("folio-intersect-{index}"))
            .build()
            .or_raise(|| ErrorKind::Pool)?;
        Ok(Self { pool })
    }

    /// Intersect sorted id sets on the pool.
    pub async fn intersect(&self, sets: Vec<IdSet>) -> Result<Vec<u64>> {
        let (tx, rx) = oneshot::channel();
        self.pool.spawn(move || {
            // The receiver is gone only if the query was dropped.
            tx.send(intersect(&sets)).ok();
        });
        let result = rx.await.or_raise(|| ErrorKind::Pool)?;
        trace!(found = result.len(), "intersection done");
        Ok(result)
    }
}

/// Intersection of sorted, deduplicated sets, in ascending order.
///
/// The smallest set is the pivot; each of its elements is kept if a binary
/// search finds it in every other set.
pub fn intersect<S: AsRef<[u64]>>(sets: &[S]) -> Vec<u64> {
    let Some((pivot_index, pivot)) = sets.iter().enumerate().min_by_key(|(_, set)| set.as_ref().len()) else {
        return Vec::new();
    };
    pivot
        .as_ref()
        .iter()
        .copied()
        .filter(|id| {
            sets.iter()
                .enumerate()
                .all(|(index, set)| index == pivot_index || set.as_ref().binary_search(id).is_ok())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::BTreeSet;

    #[rstest]
    #[case(vec![], vec![])]
    #[case(vec![vec![3, 1, 2]], vec![3, 1, 2])]
    #[case(vec![vec![1, 2, 3, 4], vec![2, 4, 6], vec![0, 2, 4]], vec![2, 4])]
    #[case(vec![vec![1, 2], vec![]], vec![])]
    #[case(vec![vec![1, 5, 9], vec![2, 6]], vec![])]
    fn test_intersect(#[case] sets: Vec<Vec<u64>>, #[case] expected: Vec<u64>) {
        assert_eq!(intersect(&sets), expected);
    }

    /// Small deterministic generator so failures are reproducible.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self, bound: u64) -> u64 {
            self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            (self.0 >> 33) % bound
        }
    }

    #[test]
    fn test_intersect_matches_naive_reference() {
        let mut rng = Lcg(42);
        for _ in 0..200 {
            let set_count = 1 + rng.next(4) as usize;
            let sets: Vec<BTreeSet<u64>> = (0..set_count)
                .map(|_| {
                    let size = rng.next(40);
                    (0..size).map(|_| rng.next(60)).collect()
                })
                .collect();
            let naive: Vec<u64> = sets[0].iter().copied().filter(|id| sets.iter().all(|set| set.contains(id))).collect();
            let sorted: Vec<Vec<u64>> = sets.iter().map(|set| set.iter().copied().collect()).collect();
            assert_eq!(intersect(&sorted), naive);
        }
    }

    #[tokio::test]
    async fn test_pool_round_trip() {
        let pool = IntersectionPool::new(INTERSECTION_WORKERS).unwrap();
        let sets: Vec<IdSet> = vec![Arc::from(vec![1, 2, 3]), Arc::from(vec![2, 3, 4])];
        assert_eq!(pool.intersect(sets).await.unwrap(), vec![2, 3]);
    }
}
