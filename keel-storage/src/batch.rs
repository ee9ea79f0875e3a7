//! Chunk planning for batches larger than a store call accepts.
//!
//! A batch of `n` items is cut into consecutive ranges of at most `limit`
//! items. Callers issue one store call per range and write results back by
//! original index, so positional correspondence survives any chunking.

use std::ops::Range;

/// Consecutive, non-empty ranges covering `0..len`, each at most `limit` long.
///
/// A zero limit is treated as one.
pub fn chunk_ranges(len: usize, limit: usize) -> Vec<Range<usize>> {
    let limit = limit.max(1);
    (0..len)
        .step_by(limit)
        .map(|start| start..(start + limit).min(len))
        .collect()
}

/// Split `items` into owned chunks, each paired with its original indices.
pub fn chunked<T>(items: Vec<(usize, T)>, limit: usize) -> Vec<Vec<(usize, T)>> {
    let limit = limit.max(1);
    let mut chunks = Vec::with_capacity(items.len().div_ceil(limit));
    let mut current = Vec::with_capacity(limit.min(items.len()));
    for item in items {
        current.push(item);
        if current.len() == limit {
            chunks.push(std::mem::replace(
                &mut current,
                Vec::with_capacity(limit),
            ));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_exact_multiple() {
        assert_eq!(chunk_ranges(1000, 500), vec![0..500, 500..1000]);
    }

    #[test]
    fn test_remainder_chunk() {
        assert_eq!(chunk_ranges(2501, 1000), vec![0..1000, 1000..2000, 2000..2501]);
    }

    #[test]
    fn test_empty_batch() {
        assert!(chunk_ranges(0, 1000).is_empty());
        assert!(chunked::<u8>(Vec::new(), 10).is_empty());
    }

    #[test]
    fn test_chunked_keeps_indices() {
        let items: Vec<(usize, char)> = vec![(0, 'a'), (3, 'b'), (7, 'c')];
        let chunks = chunked(items, 2);
        assert_eq!(chunks, vec![vec![(0, 'a'), (3, 'b')], vec![(7, 'c')]]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(1000))]

        /// Property: ranges are contiguous, bounded and cover every index once.
        #[test]
        fn prop_ranges_cover_batch(len in 0usize..5000, limit in 1usize..1200) {
            let ranges = chunk_ranges(len, limit);
            prop_assert_eq!(ranges.len(), len.div_ceil(limit));
            let mut next = 0;
            for range in &ranges {
                prop_assert_eq!(range.start, next);
                prop_assert!(!range.is_empty());
                prop_assert!(range.len() <= limit);
                next = range.end;
            }
            prop_assert_eq!(next, len);
        }

        /// Property: chunking preserves order and original indices.
        #[test]
        fn prop_chunked_preserves_order(len in 0usize..3000, limit in 1usize..600) {
            let items: Vec<(usize, usize)> = (0..len).map(|i| (i, i * 2)).collect();
            let flattened: Vec<(usize, usize)> = chunked(items.clone(), limit)
                .into_iter()
                .inspect(|chunk| assert!(chunk.len() <= limit))
                .flatten()
                .collect();
            prop_assert_eq!(flattened, items);
        }
    }
}
