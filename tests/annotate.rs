//! End-to-end annotation: store-backed walks, configured tie-breaks, and
//! annotating a transform's pending result.

mod common;

use bramble::annotate::{AnnotateError, AnnotatedLine, Annotator, KeyState, MemoryStore};
use bramble::config::BrambleConfig;
use bramble::transform::{MemoryBranch, TreeTransform};
use bramble::tree::MutableTree;
use bramble::{RevisionId, TextKey};
use common::{appending_history, key, rev, setup_tree};

fn origins<K: std::fmt::Display>(lines: &[AnnotatedLine<K>]) -> Vec<String> {
    lines.iter().map(|l| l.origin.to_string()).collect()
}

#[test]
fn appended_lines_keep_their_own_revision() {
    let store = appending_history(30);
    let out = Annotator::new(&store).annotate_flat(&key("r30")).unwrap();
    assert_eq!(out.len(), 30);
    for (i, line) in out.iter().enumerate() {
        assert_eq!(line.origin, key(&format!("r{}", i + 1)));
        assert_eq!(line.line, format!("{}\n", i + 1).into_bytes());
    }
}

#[test]
fn repeated_walks_reuse_cached_annotations() {
    let store = appending_history(10);
    let mut annotator = Annotator::new(&store);
    annotator.annotate(&key("r10")).unwrap();
    let streamed = store.records_streamed();
    assert_eq!(annotator.state(&key("r10")), KeyState::Annotated);
    annotator.annotate(&key("r10")).unwrap();
    assert_eq!(store.records_streamed(), streamed);
}

#[test]
fn criss_cross_merges_use_the_configured_tie_break() {
    let mut store = MemoryStore::new();
    store.add_text(key("base"), vec![], b"a\nb\n");
    store.add_text(key("left"), vec![key("base")], b"a\nshared\nb\n");
    store.add_text(key("right"), vec![key("base")], b"a\nshared\nb\n");
    store.add_text(key("m1"), vec![key("left"), key("right")], b"a\nshared\nb\n");
    store.add_text(key("m2"), vec![key("right"), key("left")], b"a\nshared\nb\nm2\n");
    store.add_text(key("tip"), vec![key("m1"), key("m2")], b"a\nshared\nb\nm2\n");

    let config = BrambleConfig::default();
    let tie_break = config.annotate.tie_break.strategy::<TextKey>();
    let out = Annotator::new(&store)
        .with_tie_break(tie_break)
        .annotate_flat(&key("tip"))
        .unwrap();
    assert_eq!(
        origins(&out),
        vec![
            "file.txt@base",
            "file.txt@left",
            "file.txt@base",
            "file.txt@m2"
        ]
    );
}

#[test]
fn uncommitted_text_is_attributed_to_the_working_tree() {
    let store = appending_history(3);
    let mut annotator = Annotator::new(&store);
    let current = TextKey::new("file.txt", RevisionId::current());
    annotator.add_special_text(current.clone(), vec![key("r3")], b"1\n2\nedited\n");
    let out = annotator.annotate_flat(&current).unwrap();
    assert_eq!(out[0].origin, key("r1"));
    assert_eq!(out[1].origin, key("r2"));
    assert_eq!(out[2].origin, current);
}

#[test]
fn gap_in_history_is_reported() {
    let mut store = MemoryStore::new();
    store.add_text(key("child"), vec![key("lost")], b"x\n");
    let err = Annotator::new(&store).annotate(&key("child")).unwrap_err();
    assert!(matches!(err, AnnotateError::RevisionNotPresent { key: k } if k == key("lost")));
}

#[test]
fn preview_annotation_marks_pending_edits() {
    let (_dir, mut tree) = setup_tree(&[], &[("notes", "one\ntwo\nthree\n")]);
    let mut branch = MemoryBranch::new();
    let committed = TreeTransform::new(&mut tree)
        .unwrap()
        .commit(&mut branch, "base", &[], false)
        .unwrap();
    assert_eq!(tree.last_revision(), committed);

    let mut tt = TreeTransform::new(&mut tree).unwrap();
    let notes = tt.trans_id_tree_path("notes");
    tt.delete_contents(notes).unwrap();
    tt.create_file(b"one\nTWO\nthree\nfour\n", notes, Some(notes))
        .unwrap();
    let pending = rev("pending");
    let preview = tt.preview();
    let out = preview.annotate_iter("notes", &pending).unwrap();
    let got: Vec<&RevisionId> = out.iter().map(|l| &l.origin).collect();
    assert_eq!(got, vec![&committed, &pending, &committed, &pending]);
    assert!(preview.annotate_iter("missing", &pending).is_err());
}
