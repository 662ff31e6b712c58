//! Property tests for chunk planning.

use fraudgraph::ChunkPlanner;
use proptest::prelude::*;
use std::num::NonZeroUsize;

fn planner(total: usize, size: usize) -> ChunkPlanner {
    ChunkPlanner::new(total, NonZeroUsize::new(size).unwrap())
}

proptest! {
    /// Ranges tile [0, total) in order, with no gap and no overlap.
    #[test]
    fn ranges_cover_every_row_once(total in 0usize..5_000, size in 1usize..600) {
        let plan = planner(total, size);
        let mut next = 0;
        for (i, range) in plan.iter().enumerate() {
            prop_assert_eq!(range.index, i);
            prop_assert_eq!(range.start, next);
            prop_assert!(range.end > range.start);
            next = range.end;
        }
        prop_assert_eq!(next, total);
    }

    /// No range exceeds the chunk size and only the last may be shorter.
    #[test]
    fn ranges_respect_chunk_size(total in 1usize..5_000, size in 1usize..600) {
        let ranges: Vec<_> = planner(total, size).iter().collect();
        let (last, full) = ranges.split_last().unwrap();
        for range in full {
            prop_assert_eq!(range.len(), size);
        }
        prop_assert!(last.len() >= 1 && last.len() <= size);
    }

    /// The number of ranges is ceil(total / size).
    #[test]
    fn chunk_count_is_ceiling(total in 0usize..5_000, size in 1usize..600) {
        let plan = planner(total, size);
        let expected = (total + size - 1) / size;
        prop_assert_eq!(plan.len(), expected);
        prop_assert_eq!(plan.iter().count(), expected);
        prop_assert_eq!(plan.iter().len(), expected);
    }

    /// Iterating the plan twice yields the same sequence.
    #[test]
    fn plan_is_restartable(total in 0usize..2_000, size in 1usize..300) {
        let plan = planner(total, size);
        let first: Vec<_> = plan.iter().collect();
        let second: Vec<_> = (&plan).into_iter().collect();
        prop_assert_eq!(first, second);
    }

    /// Resuming at chunk i yields exactly the tail of the full plan.
    #[test]
    fn resume_yields_plan_tail(total in 0usize..2_000, size in 1usize..300, skip in 0usize..20) {
        let plan = planner(total, size);
        let tail: Vec<_> = plan.iter().skip(skip).collect();
        let resumed: Vec<_> = plan.starting_at(skip).collect();
        prop_assert_eq!(tail, resumed);
    }
}
