//! Chunk algebra invariants over realistic diffs
//!
//! Chunks come from real `git diff -U0` output so the invariants are
//! exercised end to end: pairwise disjointness, exhaustiveness, and
//! order-independent subset composition.

mod common;

use codestory_core::diff::{chunk_deltas, compose_file, verify_disjoint, verify_exhaustive, Chunk};
use codestory_core::{ChunkingLevel, GitGateway, RepositoryGateway};
use common::TestRepo;

const BASE: &str = "\
def alpha():
    return 1

def beta(x):
    if x:
        return 2
    return 3

def gamma():
    return 4
";

const TARGET: &str = "\
import os

def alpha():
    return 10

def beta(x):
    if x:
        return 2
    return 30

def delta():
    return 5

def gamma():
    return 4
";

fn chunks_for(base: &str, target: &str) -> (Vec<Chunk>, Vec<u8>, Vec<u8>) {
    let repo = TestRepo::init();
    repo.write("m.py", base);
    repo.commit_all("base");
    repo.write("m.py", target);
    repo.commit_all("target");

    let gateway = GitGateway::open(repo.path()).unwrap();
    let deltas = gateway.diff_trees("HEAD^", "HEAD").unwrap();
    let chunks = chunk_deltas(&deltas, ChunkingLevel::AllFiles);
    (chunks, base.as_bytes().to_vec(), target.as_bytes().to_vec())
}

#[test]
fn test_pairwise_disjointness() {
    let (chunks, _, _) = chunks_for(BASE, TARGET);
    assert!(chunks.len() >= 3, "expected several chunks: {chunks:#?}");
    let refs: Vec<&Chunk> = chunks.iter().collect();
    verify_disjoint(&refs).unwrap();
}

#[test]
fn test_exhaustiveness() {
    let (chunks, base, target) = chunks_for(BASE, TARGET);
    let refs: Vec<&Chunk> = chunks.iter().collect();
    verify_exhaustive(&base, &target, &refs).unwrap();
}

#[test]
fn test_order_independence_over_permutations() {
    let (chunks, base, _) = chunks_for(BASE, TARGET);
    let n = chunks.len();

    // all single-element rotations plus the reversal
    let mut orders: Vec<Vec<usize>> = Vec::new();
    for shift in 0..n {
        orders.push((0..n).map(|i| (i + shift) % n).collect());
    }
    orders.push((0..n).rev().collect());

    let reference: Vec<&Chunk> = chunks.iter().collect();
    let expected = compose_file(&base, &reference).unwrap();
    for order in orders {
        let permuted: Vec<&Chunk> = order.iter().map(|&i| &chunks[i]).collect();
        assert_eq!(compose_file(&base, &permuted).unwrap(), expected);
    }
}

#[test]
fn test_subset_composition_is_order_free() {
    let (chunks, base, _) = chunks_for(BASE, TARGET);
    let n = chunks.len();
    assert!(n >= 2);

    // every 2-element subset, both orders
    for i in 0..n {
        for j in (i + 1)..n {
            let forward = compose_file(&base, &[&chunks[i], &chunks[j]]).unwrap();
            let backward = compose_file(&base, &[&chunks[j], &chunks[i]]).unwrap();
            assert_eq!(forward, backward, "subset ({i},{j}) is order-dependent");
        }
    }
}

#[test]
fn test_single_chunk_application_is_valid_text() {
    let (chunks, base, _) = chunks_for(BASE, TARGET);
    for chunk in &chunks {
        let applied = compose_file(&base, &[chunk]).unwrap();
        // applying one chunk alone yields the base with exactly that edit
        assert_ne!(applied, base);
    }
}

#[test]
fn test_deleted_file_chunks_reproduce_empty_file() {
    let repo = TestRepo::init();
    repo.write("gone.py", BASE);
    repo.commit_all("base");
    std::fs::remove_file(repo.path().join("gone.py")).unwrap();
    repo.commit_all("delete");

    let gateway = GitGateway::open(repo.path()).unwrap();
    let deltas = gateway.diff_trees("HEAD^", "HEAD").unwrap();
    let chunks = chunk_deltas(&deltas, ChunkingLevel::AllFiles);
    assert!(chunks.len() >= 2, "blank-line splitting applies to deletions");

    let refs: Vec<&Chunk> = chunks.iter().collect();
    verify_exhaustive(BASE.as_bytes(), b"", &refs).unwrap();
}

#[test]
fn test_no_newline_at_eof_roundtrip() {
    let repo = TestRepo::init();
    repo.write("a.txt", "one\ntwo");
    repo.commit_all("base");
    repo.write("a.txt", "one\nthree");
    repo.commit_all("target");

    let gateway = GitGateway::open(repo.path()).unwrap();
    let deltas = gateway.diff_trees("HEAD^", "HEAD").unwrap();
    let chunks = chunk_deltas(&deltas, ChunkingLevel::AllFiles);
    let refs: Vec<&Chunk> = chunks.iter().collect();
    verify_exhaustive(b"one\ntwo", b"one\nthree", &refs).unwrap();
}
