//! Integration tests for the local history store.

mod common;

use common::{map, VM_A, VM_B, VM_C};
use herakles_vm_collector::history;

#[test]
fn test_write_then_read_keeps_last_n_for_every_length() {
    let sequences: [(&str, Vec<u64>); 3] = [
        (VM_A, vec![]),
        (VM_B, vec![42]),
        (VM_C, (1..=20).collect()),
    ];
    let samples = map(&sequences);

    for n in [0usize, 1, 3, 20, 50] {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        history::write(dir.path(), &samples, n).expect("write");

        let ids = history::read(dir.path()).expect("list");
        assert_eq!(ids.len(), 3);

        for (id, values) in &sequences {
            let expected = &values[values.len().saturating_sub(n)..];
            assert_eq!(
                history::read_history(dir.path(), id).expect("read"),
                expected,
                "id {} with n={}",
                id,
                n
            );
        }
    }
}

#[test]
fn test_append_after_existing_history() {
    for n in 0usize..=4 {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let existing = vec![1u64, 2, 3];
        history::write(dir.path(), &map(&[(VM_A, existing.clone())]), 10).expect("write");

        history::append(dir.path(), &map(&[(VM_A, 4u64)]), n).expect("append");

        let mut all = existing.clone();
        all.push(4);
        let expected = &all[all.len().saturating_sub(n)..];
        assert_eq!(
            history::read_history(dir.path(), VM_A).expect("read"),
            expected,
            "n={}",
            n
        );
    }
}

#[test]
fn test_cleanup_leaves_other_files() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    history::write(
        dir.path(),
        &map(&[(VM_A, vec![1u64]), (VM_B, vec![2u64])]),
        5,
    )
    .expect("write");

    history::cleanup(dir.path(), &[VM_A.to_string(), VM_C.to_string()]).expect("cleanup");

    let ids = history::read(dir.path()).expect("list");
    assert_eq!(ids.len(), 1);
    assert!(ids.contains(VM_B));
}
