use std::collections::HashMap;

/// SQL-style `PERCENT_RANK`: `(rank - 1) / (n - 1)` where rank counts one
/// more than the number of strictly smaller values, so ties share a rank.
/// A single value ranks 0.0.
pub fn percent_rank(values: &[(u64, f64)]) -> HashMap<u64, f64> {
    let n = values.len();
    let mut ranks = HashMap::with_capacity(n);
    if n == 0 {
        return ranks;
    }
    if n == 1 {
        ranks.insert(values[0].0, 0.0);
        return ranks;
    }
    for &(id, value) in values {
        let smaller = values.iter().filter(|(_, other)| *other < value).count();
        ranks.insert(id, smaller as f64 / (n - 1) as f64);
    }
    ranks
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_three_distinct_values() {
        let ranks = percent_rank(&[(1, 3.0), (2, 2.0), (3, 1.0)]);
        assert_eq!(ranks[&1], 1.0);
        assert_eq!(ranks[&2], 0.5);
        assert_eq!(ranks[&3], 0.0);
    }

    #[rstest]
    fn test_ties_share_a_rank() {
        let ranks = percent_rank(&[(1, 5.0), (2, 5.0), (3, 1.0)]);
        assert_eq!(ranks[&1], 0.5);
        assert_eq!(ranks[&2], 0.5);
        assert_eq!(ranks[&3], 0.0);
    }

    #[rstest]
    fn test_single_value_is_zero() {
        let ranks = percent_rank(&[(7, 42.0)]);
        assert_eq!(ranks[&7], 0.0);
    }

    #[rstest]
    fn test_empty_input() {
        assert!(percent_rank(&[]).is_empty());
    }
}
