use bytes::Bytes;

use crate::error::StoreError;

/// Byte length of [`CANONICAL_CONTENT`].
pub const CANONICAL_LEN: i64 = 4000;

/// The fixed document every request is served from.
pub const CANONICAL_CONTENT: &str = include_str!("lorem.txt");

/// Immutable in-memory content with a length fixed at construction.
///
/// Cloning is cheap, the bytes are reference counted and never mutated, so a
/// fresh store per request needs no synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentStore {
    contents: Bytes,
}

impl ContentStore {
    /// Construct a store over arbitrary bytes.
    pub fn new(contents: impl Into<Bytes>) -> Self {
        ContentStore { contents: contents.into() }
    }

    /// The canonical 4000 byte document.
    pub fn canonical() -> Self {
        ContentStore::new(Bytes::from_static(CANONICAL_CONTENT.as_bytes()))
    }

    /// Total number of bytes held.
    pub fn len(&self) -> i64 {
        self.contents.len() as i64
    }

    pub fn is_empty(&self) -> bool {
        self.contents.is_empty()
    }

    /// The whole content as a read-only view.
    pub fn read_all(&self) -> Bytes {
        self.contents.clone()
    }

    /// Bytes in `start..end`, end exclusive.
    ///
    /// Fails with [`StoreError::OutOfRange`] when `end < start`, `end > len()`
    /// or `start < 0`.
    pub fn read_range(&self, start: i64, end: i64) -> Result<Bytes, StoreError> {
        if end < start || end > self.len() || start < 0 {
            return Err(StoreError::OutOfRange { start, end, len: self.len() });
        }
        Ok(self.contents.slice(start as usize..end as usize))
    }
}

impl Default for ContentStore {
    fn default() -> Self {
        ContentStore::canonical()
    }
}
