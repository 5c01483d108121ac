//! Range query edge case tests for `MemoryBackend`.
//!
//! Covers boundary inclusion/exclusion, unbounded ranges, degenerate ranges
//! and prefix scans built with [`prefix_end`].

#![allow(clippy::expect_used, clippy::panic)]

use std::ops::Bound;

use homemendi_storage::{KeyValue, MemoryBackend, StorageBackend, prefix_end};

/// Helper: populate backend with keys "a", "b", "c", "d", "e".
async fn populated_backend() -> MemoryBackend {
    let backend = MemoryBackend::new();
    for key in ["a", "b", "c", "d", "e"] {
        backend.set(key.as_bytes().to_vec(), format!("v{key}").into_bytes()).await.expect("set");
    }
    backend
}

fn keys(results: &[KeyValue]) -> Vec<String> {
    results.iter().map(|kv| String::from_utf8_lossy(&kv.key).into_owned()).collect()
}

// ============================================================================
// Degenerate and single-key ranges
// ============================================================================

#[tokio::test]
async fn test_degenerate_exclusive_range_start_equals_end() {
    let backend = populated_backend().await;

    let results = backend.get_range(b"c".to_vec()..b"c".to_vec()).await.expect("range");
    assert!(results.is_empty(), "start == end (exclusive) should be empty, got {results:?}");
}

#[tokio::test]
async fn test_single_key_inclusive_range() {
    let backend = populated_backend().await;

    let results = backend.get_range(b"c".to_vec()..=b"c".to_vec()).await.expect("range");
    assert_eq!(keys(&results), ["c"]);
    assert_eq!(results[0].value.as_ref(), b"vc");
}

#[tokio::test]
async fn test_range_between_keys_returns_empty() {
    let backend = populated_backend().await;

    let results = backend.get_range(b"b0".to_vec()..b"b9".to_vec()).await.expect("range");
    assert!(results.is_empty());
}

// ============================================================================
// Boundary inclusion/exclusion with tuple bounds
// ============================================================================

#[tokio::test]
async fn test_tuple_bounds() {
    let backend = populated_backend().await;

    let cases: [((Bound<Vec<u8>>, Bound<Vec<u8>>), &[&str]); 5] = [
        ((Bound::Included(b"b".to_vec()), Bound::Included(b"d".to_vec())), &["b", "c", "d"]),
        ((Bound::Excluded(b"a".to_vec()), Bound::Excluded(b"e".to_vec())), &["b", "c", "d"]),
        ((Bound::Excluded(b"b".to_vec()), Bound::Included(b"d".to_vec())), &["c", "d"]),
        ((Bound::Included(b"b".to_vec()), Bound::Excluded(b"d".to_vec())), &["b", "c"]),
        ((Bound::Excluded(b"c".to_vec()), Bound::Unbounded), &["d", "e"]),
    ];

    for (range, expected) in cases {
        let results = backend.get_range(range.clone()).await.expect("range");
        assert_eq!(keys(&results), expected, "range {range:?}");
    }
}

#[tokio::test]
async fn test_fully_unbounded_range_is_sorted() {
    let backend = MemoryBackend::new();
    for key in ["e", "a", "d", "b", "c"] {
        backend.set(key.as_bytes().to_vec(), Vec::new()).await.expect("set");
    }

    let results = backend
        .get_range((Bound::<Vec<u8>>::Unbounded, Bound::<Vec<u8>>::Unbounded))
        .await
        .expect("range");
    assert_eq!(keys(&results), ["a", "b", "c", "d", "e"]);
}

#[tokio::test]
async fn test_fully_unbounded_empty_backend() {
    let backend = MemoryBackend::new();
    let results = backend.get_range(..).await.expect("range");
    assert!(results.is_empty());
}

// ============================================================================
// Prefix scans
// ============================================================================

#[tokio::test]
async fn test_prefix_scan_excludes_neighbouring_partitions() {
    let backend = MemoryBackend::new();
    for key in ["member/alice/1", "member/alice/2", "member/alice0", "member/alicex/1", "member/bob/1"]
    {
        backend.set(key.as_bytes().to_vec(), b"{}".to_vec()).await.expect("set");
    }

    let prefix = b"member/alice/".to_vec();
    let end = prefix_end(&prefix).expect("bounded prefix");
    let results = backend.get_range(prefix..end).await.expect("range");

    assert_eq!(keys(&results), ["member/alice/1", "member/alice/2"]);
}

#[tokio::test]
async fn test_prefix_scan_with_all_ff_prefix() {
    let backend = MemoryBackend::new();
    backend.set(vec![0xFF, 0xFF, 0x01], b"x".to_vec()).await.expect("set");
    backend.set(vec![0xFE], b"y".to_vec()).await.expect("set");

    let prefix = vec![0xFF, 0xFF];
    assert_eq!(prefix_end(&prefix), None);
    let results = backend.get_range(prefix..).await.expect("range");

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].key.as_ref(), &[0xFF, 0xFF, 0x01]);
}
