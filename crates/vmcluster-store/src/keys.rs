//! Key encoding utilities for `RocksDB`.
//!
//! Identifiers are ASCII strings, so composite keys join their parts with a
//! NUL byte. A prefix scan over `first \0` lists every entry under `first`.

/// Separator between the parts of a composite key.
pub const SEPARATOR: u8 = 0;

/// Encode a primary key (just the id bytes).
#[must_use]
pub fn id_key(id: &str) -> Vec<u8> {
    id.as_bytes().to_vec()
}

/// Encode a composite key: `first || \0 || second`.
#[must_use]
pub fn composite_key(first: &str, second: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(first.len() + second.len() + 1);
    key.extend_from_slice(first.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(second.as_bytes());
    key
}

/// Encode the scan prefix for every composite key starting with `first`.
#[must_use]
pub fn prefix(first: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(first.len() + 1);
    key.extend_from_slice(first.as_bytes());
    key.push(SEPARATOR);
    key
}

/// Extract the second part of a composite key.
///
/// Returns `None` if the key has no separator or is not UTF-8.
#[must_use]
pub fn second_part(key: &[u8]) -> Option<&str> {
    let pos = key.iter().position(|b| *b == SEPARATOR)?;
    std::str::from_utf8(&key[pos + 1..]).ok()
}
