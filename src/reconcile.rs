//! VM set reconciliation between two polls.

use ahash::AHashSet as HashSet;

/// Diffs the previous and current VM sets.
///
/// Returns `(added, removed)`: VMs present only in `current`, and VMs
/// present only in `previous`. Both lists are sorted.
pub fn reconcile(
    previous: &HashSet<String>,
    current: &HashSet<String>,
) -> (Vec<String>, Vec<String>) {
    let mut added: Vec<String> = current.difference(previous).cloned().collect();
    let mut removed: Vec<String> = previous.difference(current).cloned().collect();
    added.sort_unstable();
    removed.sort_unstable();
    (added, removed)
}

/// Elements of `a` that are not in `b`, in the order they appear in `a`.
pub fn subtract<T: PartialEq + Clone>(a: &[T], b: &[T]) -> Vec<T> {
    a.iter().filter(|x| !b.contains(x)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_reconcile_added_and_removed() {
        let previous = set(&["A", "B"]);
        let current = set(&["B", "C"]);

        let (added, removed) = reconcile(&previous, &current);
        assert_eq!(added, vec!["C".to_string()]);
        assert_eq!(removed, vec!["A".to_string()]);
    }

    #[test]
    fn test_reconcile_disjoint_and_covering() {
        let previous = set(&["a", "b", "c", "d"]);
        let current = set(&["c", "d", "e", "f", "g"]);

        let (added, removed) = reconcile(&previous, &current);
        assert!(added.iter().all(|id| !removed.contains(id)));

        // Every current VM was either added or already known
        for id in &current {
            assert!(added.contains(id) || previous.contains(id));
        }
        assert_eq!(added, vec!["e", "f", "g"]);
        assert_eq!(removed, vec!["a", "b"]);
    }

    #[test]
    fn test_reconcile_empty_sets() {
        let (added, removed) = reconcile(&set(&[]), &set(&[]));
        assert!(added.is_empty());
        assert!(removed.is_empty());

        let (added, removed) = reconcile(&set(&[]), &set(&["x"]));
        assert_eq!(added, vec!["x"]);
        assert!(removed.is_empty());

        let (added, removed) = reconcile(&set(&["x"]), &set(&[]));
        assert!(added.is_empty());
        assert_eq!(removed, vec!["x"]);
    }

    #[test]
    fn test_subtract() {
        assert_eq!(subtract(&[1, 2, 3, 4, 2], &[2, 5]), vec![1, 3, 4]);
        assert_eq!(subtract::<u32>(&[], &[1]), Vec::<u32>::new());
        assert_eq!(subtract(&[7, 8], &[]), vec![7, 8]);
    }
}
