//! Gateway integration tests against scratch repositories

mod common;

use std::sync::Arc;

use codestory_core::{
    CoreError, DeltaKind, GitGateway, RepositoryGateway, Signature, TreeUpdate,
};
use common::TestRepo;

fn gateway(repo: &TestRepo) -> GitGateway {
    GitGateway::open(repo.path()).expect("open gateway")
}

#[test]
fn test_blob_roundtrip() {
    let repo = TestRepo::init();
    repo.write("a.txt", "hello\n");
    repo.commit_all("init");

    let gateway = gateway(&repo);
    let id = gateway.write_blob(b"some content\n").unwrap();
    assert_eq!(gateway.read_blob(&id).unwrap(), b"some content\n".to_vec());
}

#[test]
fn test_read_tree_lists_nested_paths() {
    let repo = TestRepo::init();
    repo.write("src/lib.rs", "fn x() {}\n");
    repo.write("README.md", "hi\n");
    repo.commit_all("init");

    let gateway = gateway(&repo);
    let tree = gateway.tree_of("HEAD").unwrap();
    let entries = gateway.read_tree(&tree).unwrap();
    assert!(entries.contains_key("src/lib.rs"));
    assert!(entries.contains_key("README.md"));
    assert_eq!(entries["src/lib.rs"].mode, "100644");
}

#[test]
fn test_write_tree_put_and_remove() {
    let repo = TestRepo::init();
    repo.write("keep.txt", "keep\n");
    repo.write("drop.txt", "drop\n");
    repo.commit_all("init");

    let gateway = gateway(&repo);
    let base_tree = gateway.tree_of("HEAD").unwrap();
    let blob = gateway.write_blob(b"fresh\n").unwrap();

    let tree = gateway
        .write_tree(
            &base_tree,
            &[
                TreeUpdate::Put {
                    path: "new/file.txt".to_string(),
                    mode: "100644".to_string(),
                    oid: blob,
                },
                TreeUpdate::Remove {
                    path: "drop.txt".to_string(),
                },
            ],
        )
        .unwrap();

    let entries = gateway.read_tree(&tree).unwrap();
    assert!(entries.contains_key("keep.txt"));
    assert!(entries.contains_key("new/file.txt"));
    assert!(!entries.contains_key("drop.txt"));
}

#[test]
fn test_commit_and_info() {
    let repo = TestRepo::init();
    repo.write("a.txt", "one\n");
    let base = repo.commit_all("init");

    let gateway = gateway(&repo);
    let tree = gateway.tree_of("HEAD").unwrap();
    let author = Signature {
        name: "Original Author".to_string(),
        email: "orig@example.com".to_string(),
        date: Some("2024-03-01T12:00:00+00:00".to_string()),
    };
    let commit = gateway
        .write_commit(&tree, &[base.clone()], "feat: something\n", Some(&author), None)
        .unwrap();

    let info = gateway.commit_info(&commit).unwrap();
    assert_eq!(info.parents, vec![base]);
    assert_eq!(info.author.name, "Original Author");
    assert_eq!(info.message.trim(), "feat: something");
    assert_eq!(info.tree, tree);
}

#[test]
fn test_diff_trees_zero_context() {
    let repo = TestRepo::init();
    repo.write("a.py", "def f():\n    return 1\n");
    repo.commit_all("init");
    repo.write("a.py", "def f():\n    return 2\n");
    repo.write("b.py", "x = 1\n");
    repo.commit_all("edit");

    let gateway = gateway(&repo);
    let deltas = gateway.diff_trees("HEAD^", "HEAD").unwrap();
    assert_eq!(deltas.len(), 2);

    let a = deltas
        .iter()
        .find(|d| d.change.canonical_path() == "a.py")
        .unwrap();
    assert_eq!(a.change.kind, DeltaKind::Modified);
    assert_eq!(a.hunks.len(), 1);
    assert_eq!(a.hunks[0].old_lines, vec![b"    return 1\n".to_vec()]);

    let b = deltas
        .iter()
        .find(|d| d.change.canonical_path() == "b.py")
        .unwrap();
    assert_eq!(b.change.kind, DeltaKind::Added);
}

#[test]
fn test_working_tree_snapshot_keeps_index_clean() {
    let repo = TestRepo::init();
    repo.write("a.txt", "committed\n");
    repo.commit_all("init");
    repo.write("a.txt", "dirty\n");
    repo.write("untracked.txt", "new\n");

    let gateway = gateway(&repo);
    let snapshot = gateway.working_tree_snapshot(&[]).unwrap();
    let entries = gateway.read_tree(&snapshot).unwrap();
    assert!(entries.contains_key("untracked.txt"));

    // the user's index is untouched: nothing staged
    assert_eq!(repo.git(&["diff", "--cached", "--name-only"]), "");
}

#[test]
fn test_sandbox_isolates_until_finalize() {
    let repo = TestRepo::init();
    repo.write("a.txt", "x\n");
    repo.commit_all("init");

    let gateway = gateway(&repo);
    let sandbox = Arc::new(gateway.open_sandbox().unwrap());
    gateway.set_sandbox(Some(Arc::clone(&sandbox)));
    let id = gateway.write_blob(b"sandboxed\n").unwrap();

    // visible through the sandbox, absent from the primary store
    assert_eq!(gateway.read_blob(&id).unwrap(), b"sandboxed\n".to_vec());
    let loose = repo
        .path()
        .join(".git/objects")
        .join(&id[..2])
        .join(&id[2..]);
    assert!(!loose.exists(), "object leaked into the primary store");

    sandbox.finalize().unwrap();
    assert!(loose.exists(), "finalize must promote the object");

    gateway.set_sandbox(None);
    assert_eq!(gateway.read_blob(&id).unwrap(), b"sandboxed\n".to_vec());
}

#[test]
fn test_discarded_sandbox_leaves_no_objects() {
    let repo = TestRepo::init();
    repo.write("a.txt", "x\n");
    repo.commit_all("init");

    let gateway = gateway(&repo);
    let id;
    {
        let sandbox = Arc::new(gateway.open_sandbox().unwrap());
        gateway.set_sandbox(Some(Arc::clone(&sandbox)));
        id = gateway.write_blob(b"discarded\n").unwrap();
        gateway.set_sandbox(None);
        drop(sandbox);
    }
    let loose = repo
        .path()
        .join(".git/objects")
        .join(&id[..2])
        .join(&id[2..]);
    assert!(!loose.exists());
}

#[test]
fn test_update_ref_cas_detects_concurrent_move() {
    let repo = TestRepo::init();
    repo.write("a.txt", "x\n");
    let first = repo.commit_all("init");
    repo.write("a.txt", "y\n");
    let second = repo.commit_all("second");

    let gateway = gateway(&repo);
    // expect `first` but the branch is at `second`
    let result = gateway.update_ref_cas("refs/heads/main", &second, &first);
    match result {
        Err(CoreError::RefCasFailed { found, .. }) => assert_eq!(found, second),
        other => panic!("expected a CAS failure, got {other:?}"),
    }
    assert_eq!(repo.head(), second);
}

#[test]
fn test_rev_list_and_merge_detection() {
    let repo = TestRepo::init();
    repo.write("a.txt", "1\n");
    repo.commit_all("one");
    repo.write("a.txt", "2\n");
    repo.commit_all("two");
    repo.write("a.txt", "3\n");
    repo.commit_all("three");

    let gateway = gateway(&repo);
    let commits = gateway.rev_list_first_parent("HEAD").unwrap();
    assert_eq!(commits.len(), 3);
    assert!(gateway.first_merge_commit("HEAD").unwrap().is_none());
}
