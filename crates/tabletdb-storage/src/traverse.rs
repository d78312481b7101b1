use std::collections::VecDeque;
use std::ops::Bound;

use sled::{IVec, Tree};

use tabletdb_common::error::StorageError;
use tabletdb_common::metrics;

use crate::encoding::{self, Version};
use crate::snapshot::SnapshotGuard;

/// Cursor over one column family pinned to a snapshot.
///
/// Only versions committed at or before the snapshot are visible, and a key
/// whose newest visible version is a delete is skipped. Physical entries are
/// fetched in batches, so no store iterator outlives a call. The snapshot is
/// released when the cursor is dropped.
pub struct TraverseIterator {
    family: Tree,
    snapshot: SnapshotGuard,
    readahead: usize,
    lower: Bound<Vec<u8>>,
    buffer: VecDeque<(IVec, IVec)>,
    exhausted: bool,
    last_resolved: Option<Vec<u8>>,
    current: Option<(Vec<u8>, Vec<u8>)>,
    count: u64,
    status: Option<StorageError>,
}

impl TraverseIterator {
    pub(crate) fn new(family: Tree, snapshot: SnapshotGuard, readahead: usize) -> Self {
        Self {
            family,
            snapshot,
            readahead: readahead.max(1),
            lower: Bound::Unbounded,
            buffer: VecDeque::new(),
            exhausted: true,
            last_resolved: None,
            current: None,
            count: 0,
            status: None,
        }
    }

    pub fn valid(&self) -> bool {
        self.current.is_some()
    }

    /// Move to the next visible entry
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) {
        if self.current.is_some() {
            self.count += 1;
            self.advance();
        }
    }

    /// Position at the first entry whose key is >= `key`
    pub fn seek(&mut self, key: &[u8]) {
        self.reset(Bound::Included(encoding::escape(key)));
    }

    pub fn seek_to_first(&mut self) {
        self.reset(Bound::Unbounded);
    }

    /// Key of the current entry
    pub fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(key, _)| key.as_slice())
    }

    /// Row of the current entry
    pub fn value(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, row)| row.as_slice())
    }

    /// Entries visited since construction
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Error that invalidated the cursor, if any
    pub fn status(&self) -> Option<&StorageError> {
        self.status.as_ref()
    }

    /// Sequence this cursor is pinned to
    pub fn sequence(&self) -> u64 {
        self.snapshot.sequence()
    }

    fn reset(&mut self, lower: Bound<Vec<u8>>) {
        self.lower = lower;
        self.buffer.clear();
        self.exhausted = false;
        self.last_resolved = None;
        self.status = None;
        self.advance();
    }

    fn advance(&mut self) {
        self.current = None;
        while let Some((raw_key, raw_value)) = self.pop() {
            match self.resolve(&raw_key, &raw_value) {
                Ok(Some(entry)) => {
                    self.current = Some(entry);
                    return;
                }
                Ok(None) => {}
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        }
    }

    /// Visible entry for one physical entry, or `None` if it is shadowed,
    /// newer than the snapshot, or a delete.
    fn resolve(&mut self, raw_key: &[u8], raw_value: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, StorageError> {
        let (escaped, sequence) = encoding::split_key(raw_key)?;
        if sequence > self.snapshot.sequence() {
            return Ok(None);
        }
        if self.last_resolved.as_deref() == Some(escaped) {
            return Ok(None);
        }
        self.last_resolved = Some(escaped.to_vec());

        match encoding::decode_value(raw_value)? {
            Version::Put(row) => Ok(Some((encoding::unescape(escaped)?, row.to_vec()))),
            Version::Delete => Ok(None),
        }
    }

    fn pop(&mut self) -> Option<(IVec, IVec)> {
        if self.buffer.is_empty() && !self.exhausted {
            self.fill();
        }
        self.buffer.pop_front()
    }

    fn fill(&mut self) {
        let range = (self.lower.clone(), Bound::Unbounded);
        let mut fetched = 0;
        for entry in self.family.range::<Vec<u8>, _>(range).take(self.readahead) {
            match entry {
                Ok((raw_key, raw_value)) => {
                    self.lower = Bound::Excluded(raw_key.to_vec());
                    self.buffer.push_back((raw_key, raw_value));
                    fetched += 1;
                }
                Err(e) => {
                    self.fail(StorageError::ReadFailed(e.to_string()));
                    return;
                }
            }
        }
        if fetched < self.readahead {
            self.exhausted = true;
        }
    }

    fn fail(&mut self, error: StorageError) {
        self.status = Some(error);
        self.current = None;
        self.buffer.clear();
        self.exhausted = true;
    }
}

impl Drop for TraverseIterator {
    fn drop(&mut self) {
        metrics::record_traverse(self.count);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::snapshot::SnapshotTracker;

    struct Fixture {
        _db: sled::Db,
        tree: Tree,
        tracker: Arc<SnapshotTracker>,
    }

    impl Fixture {
        fn new() -> Self {
            let db = sled::Config::new().temporary(true).open().unwrap();
            let tree = db.open_tree("idx0").unwrap();
            Self {
                _db: db,
                tree,
                tracker: Arc::new(SnapshotTracker::new()),
            }
        }

        fn put(&self, key: &[u8], row: &[u8]) {
            self.write(key, encoding::encode_put(row));
        }

        fn delete(&self, key: &[u8]) {
            self.write(key, encoding::encode_delete());
        }

        fn write(&self, key: &[u8], raw: Vec<u8>) {
            let sequence = self.tracker.last_sequence() + 1;
            self.tree.insert(encoding::encode_key(key, sequence), raw).unwrap();
            self.tracker.publish(sequence);
        }

        fn traverse(&self, readahead: usize) -> TraverseIterator {
            TraverseIterator::new(self.tree.clone(), self.tracker.acquire(), readahead)
        }
    }

    fn collect(it: &mut TraverseIterator) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        while it.valid() {
            out.push((it.key().unwrap().to_vec(), it.value().unwrap().to_vec()));
            it.next();
        }
        out
    }

    #[test]
    fn test_unpositioned_cursor_is_invalid() {
        let fixture = Fixture::new();
        fixture.put(b"a", b"1");
        let it = fixture.traverse(4);
        assert!(!it.valid());
        assert_eq!(it.key(), None);
    }

    #[test]
    fn test_newest_visible_version_wins() {
        let fixture = Fixture::new();
        fixture.put(b"a", b"1");
        fixture.put(b"b", b"2");
        fixture.put(b"a", b"3");
        fixture.put(b"c", b"4");
        fixture.delete(b"c");

        // A readahead of one forces a refill between every physical entry.
        for readahead in [1, 2, 64] {
            let mut it = fixture.traverse(readahead);
            it.seek_to_first();
            assert_eq!(
                collect(&mut it),
                vec![(b"a".to_vec(), b"3".to_vec()), (b"b".to_vec(), b"2".to_vec())]
            );
            assert_eq!(it.count(), 2);
            assert!(it.status().is_none());
        }
    }

    #[test]
    fn test_later_writes_are_invisible() {
        let fixture = Fixture::new();
        fixture.put(b"a", b"old");
        let mut it = fixture.traverse(2);

        fixture.delete(b"a");
        fixture.put(b"b", b"new");

        it.seek_to_first();
        assert_eq!(collect(&mut it), vec![(b"a".to_vec(), b"old".to_vec())]);
        assert_eq!(it.sequence(), 1);
    }

    #[test]
    fn test_seek_positions_at_first_key_not_less() {
        let fixture = Fixture::new();
        for key in [&b"a"[..], b"c", b"e"] {
            fixture.put(key, key);
        }
        let mut it = fixture.traverse(8);

        it.seek(b"c");
        assert_eq!(it.key(), Some(&b"c"[..]));
        it.seek(b"b");
        assert_eq!(it.key(), Some(&b"c"[..]));
        it.seek(b"f");
        assert!(!it.valid());
        it.seek_to_first();
        assert_eq!(it.key(), Some(&b"a"[..]));
    }

    #[test]
    fn test_snapshot_released_on_drop() {
        let fixture = Fixture::new();
        let it = fixture.traverse(8);
        assert_eq!(fixture.tracker.active_count(), 1);
        drop(it);
        assert_eq!(fixture.tracker.active_count(), 0);
    }

    #[test]
    fn test_corrupt_entry_invalidates_cursor() {
        let fixture = Fixture::new();
        fixture.tree.insert(&b"bad"[..], &b"x"[..]).unwrap();
        let mut it = fixture.traverse(8);

        it.seek_to_first();
        assert!(!it.valid());
        assert!(matches!(it.status(), Some(StorageError::CorruptData(_))));
    }
}
