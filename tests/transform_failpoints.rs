//! Failpoint-driven apply failures.
//!
//! The failpoint registry is process-global, so these live in their own test
//! binary where no other transform can trip an armed failpoint.

#![cfg(feature = "failpoints")]

mod common;

use bramble::failpoints::{
    FP_TRANSFORM_AFTER_REMOVALS, FP_TRANSFORM_BEFORE_INDEX_UPDATE, FP_TRANSFORM_INSERTION,
    FP_TREE_SAVE_INDEX, FailpointAction, clear, set,
};
use bramble::transform::{ApplyOptions, TransformError, TreeTransform};
use bramble::tree::{MutableTree, WorkingTree};
use common::{setup_tree, snapshot, staging_is_clean};

fn run_with_failpoint(name: &str, action: FailpointAction) {
    let (dir, mut tree) = setup_tree(
        &["d"],
        &[("a", "a\n"), ("build.sh", "#!/bin/sh\n"), ("d/x", "x\n")],
    );
    let before = snapshot(dir.path());
    let mut tt = TreeTransform::new(&mut tree).unwrap();
    let root = tt.root();
    let a = tt.trans_id_tree_path("a");
    tt.adjust_path("b", root, a).unwrap();
    let x = tt.trans_id_tree_path("d/x");
    tt.delete_versioned(x).unwrap();
    tt.new_file("c", root, b"c\n", None).unwrap();
    // Sorts between `b` and `c`, so its mode changes before the insertion
    // failpoint trips on `c`.
    let script = tt.trans_id_tree_path("build.sh");
    tt.set_executability(Some(true), script).unwrap();

    set(name, action);
    let result = tt.apply(ApplyOptions::default());
    clear(name);

    let err = result.expect_err(name);
    assert!(err.to_string().contains("failpoint"), "{name}: {err}");
    assert!(matches!(
        tt.apply(ApplyOptions::default()),
        Err(TransformError::ReusingTransform)
    ));
    drop(tt);
    assert_eq!(snapshot(dir.path()), before, "{name}");
    assert!(staging_is_clean(dir.path()), "{name}");
    for t in [&tree, &WorkingTree::open(dir.path()).unwrap()] {
        assert!(t.is_versioned("a"), "{name}");
        assert!(t.is_versioned("d/x"), "{name}");
        assert!(!t.is_versioned("c"), "{name}");
        assert!(!t.entry("build.sh").unwrap().executable, "{name}");
    }
}

#[test]
fn every_apply_failpoint_rolls_back() {
    run_with_failpoint(
        FP_TRANSFORM_AFTER_REMOVALS,
        FailpointAction::Error("after removals".into()),
    );
    run_with_failpoint(
        FP_TRANSFORM_INSERTION,
        FailpointAction::ErrorAfter {
            skip: 1,
            message: "disk full".into(),
        },
    );
    run_with_failpoint(
        FP_TRANSFORM_BEFORE_INDEX_UPDATE,
        FailpointAction::Error("before index".into()),
    );
    run_with_failpoint(
        FP_TREE_SAVE_INDEX,
        FailpointAction::Error("index write".into()),
    );
}
