//! Common types used across storage operations.

use bytes::Bytes;

/// Key-value pair returned from range queries.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use homemendi_storage::KeyValue;
///
/// let kv = KeyValue::new(Bytes::from("member/a/b"), Bytes::from("{}"));
/// assert_eq!(kv.key.as_ref(), b"member/a/b");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The key identifying this entry.
    pub key: Bytes,

    /// The value stored at this key.
    pub value: Bytes,
}

impl KeyValue {
    /// Creates a new key-value pair.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}

/// Returns the exclusive upper bound of all keys starting with `prefix`.
///
/// Increments the last byte that is not `0xFF` and truncates after it.
/// Returns `None` when every byte is `0xFF` (the prefix range is unbounded
/// above).
///
/// # Examples
///
/// ```
/// use homemendi_storage::prefix_end;
///
/// assert_eq!(prefix_end(b"member/"), Some(b"member0".to_vec()));
/// assert_eq!(prefix_end(&[0xFF, 0xFF]), None);
/// ```
#[must_use]
pub fn prefix_end(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.pop() {
        if last < 0xFF {
            end.push(last + 1);
            return Some(end);
        }
    }
    None
}
