//! Small helpers shared by the refresh and scan loops.

/// Split `values` into batches of at most `size`, preserving order.
///
/// Empty input yields a single empty chunk so callers always get at least
/// one batch to iterate.
pub fn chunk<T: Clone>(values: &[T], size: usize) -> Vec<Vec<T>> {
    if values.is_empty() {
        return vec![Vec::new()];
    }
    values
        .chunks(size.max(1))
        .map(|batch| batch.to_vec())
        .collect()
}

/// Human-readable "last seen X ago" wording for task descriptions.
pub fn humanize_since(duration: chrono::Duration) -> String {
    let seconds = duration.num_seconds().max(0);
    if seconds < 60 {
        format!("{seconds}s ago")
    } else if seconds < 3600 {
        format!("{}m ago", seconds / 60)
    } else if seconds < 86400 {
        format!("{}h ago", seconds / 3600)
    } else {
        format!("{}d ago", seconds / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_preserves_order_and_sizes() {
        let values: Vec<i32> = (1..=7).collect();
        let batches = chunk(&values, 3);
        assert_eq!(batches, vec![vec![1, 2, 3], vec![4, 5, 6], vec![7]]);
    }

    #[test]
    fn chunk_exact_multiple() {
        let values: Vec<i32> = (1..=6).collect();
        let batches = chunk(&values, 3);
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 3));
    }

    #[test]
    fn chunk_empty_input_yields_single_empty_chunk() {
        let batches = chunk::<i32>(&[], 5);
        assert_eq!(batches, vec![Vec::<i32>::new()]);
    }

    #[test]
    fn chunk_zero_size_treated_as_one() {
        let batches = chunk(&[1, 2], 0);
        assert_eq!(batches, vec![vec![1], vec![2]]);
    }

    #[test]
    fn humanize_buckets() {
        assert_eq!(humanize_since(chrono::Duration::seconds(42)), "42s ago");
        assert_eq!(humanize_since(chrono::Duration::seconds(150)), "2m ago");
        assert_eq!(humanize_since(chrono::Duration::hours(5)), "5h ago");
        assert_eq!(humanize_since(chrono::Duration::days(3)), "3d ago");
        assert_eq!(humanize_since(chrono::Duration::seconds(-10)), "0s ago");
    }
}
