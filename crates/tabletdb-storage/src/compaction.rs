//! Version compaction
//!
//! For a watermark `w`, every version newer than `w` is kept, the newest
//! version at or below `w` is kept unless it is a delete, and everything older
//! is removed. No snapshot at or above `w` can tell the difference.

use sled::{Batch, Tree};
use tracing::debug;

use tabletdb_common::error::{Result, StorageError};

use crate::encoding::{self, Version};

/// Compact every family, `threads` families at a time.
pub(crate) fn compact_families(families: &[Tree], watermark: u64, threads: usize) -> Result<u64> {
    let mut removed = 0;
    for chunk in families.chunks(threads.max(1)) {
        let results = crossbeam::scope(|scope| {
            let handles: Vec<_> = chunk
                .iter()
                .map(|family| scope.spawn(move |_| compact_family(family, watermark)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle.join().unwrap_or_else(|_| {
                        Err(StorageError::CompactionFailed("compaction worker panicked".to_string()))
                    })
                })
                .collect::<Vec<_>>()
        })
        .map_err(|_| StorageError::CompactionFailed("compaction scope panicked".to_string()))?;

        for result in results {
            removed += result?;
        }
    }
    Ok(removed)
}

/// Remove the versions of one family that are invisible at `watermark`.
pub(crate) fn compact_family(family: &Tree, watermark: u64) -> std::result::Result<u64, StorageError> {
    let mut batch = Batch::default();
    let mut removed = 0;
    // Escaped key whose newest version at or below the watermark was already seen
    let mut settled: Option<Vec<u8>> = None;

    for entry in family.iter() {
        let (raw_key, raw_value) = entry.map_err(|e| StorageError::CompactionFailed(e.to_string()))?;
        let (escaped, sequence) = encoding::split_key(&raw_key)?;
        if sequence > watermark {
            continue;
        }

        if settled.as_deref() == Some(escaped) {
            batch.remove(raw_key);
            removed += 1;
            continue;
        }
        settled = Some(escaped.to_vec());

        if encoding::decode_value(&raw_value)? == Version::Delete {
            batch.remove(raw_key);
            removed += 1;
        }
    }

    if removed > 0 {
        family
            .apply_batch(batch)
            .map_err(|e| StorageError::CompactionFailed(e.to_string()))?;
        debug!(
            family = %String::from_utf8_lossy(&family.name()),
            watermark,
            removed,
            "Compacted column family"
        );
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family() -> (sled::Db, Tree) {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let tree = db.open_tree("a").unwrap();
        (db, tree)
    }

    fn put(tree: &Tree, key: &[u8], sequence: u64, row: &[u8]) {
        tree.insert(encoding::encode_key(key, sequence), encoding::encode_put(row))
            .unwrap();
    }

    fn delete(tree: &Tree, key: &[u8], sequence: u64) {
        tree.insert(encoding::encode_key(key, sequence), encoding::encode_delete())
            .unwrap();
    }

    #[test]
    fn test_keeps_newest_below_watermark_and_everything_above() {
        let (_db, tree) = family();
        put(&tree, b"k", 1, b"v1");
        put(&tree, b"k", 2, b"v2");
        put(&tree, b"k", 5, b"v5");

        assert_eq!(compact_family(&tree, 3).unwrap(), 1);
        assert!(tree.contains_key(encoding::encode_key(b"k", 2)).unwrap());
        assert!(tree.contains_key(encoding::encode_key(b"k", 5)).unwrap());
        assert!(!tree.contains_key(encoding::encode_key(b"k", 1)).unwrap());
    }

    #[test]
    fn test_settled_delete_is_dropped_with_history() {
        let (_db, tree) = family();
        put(&tree, b"gone", 1, b"v");
        delete(&tree, b"gone", 2);
        put(&tree, b"live", 3, b"v");

        assert_eq!(compact_family(&tree, 3).unwrap(), 2);
        assert_eq!(tree.len(), 1);
        assert_eq!(compact_family(&tree, 3).unwrap(), 0);
    }

    #[test]
    fn test_delete_above_watermark_is_kept() {
        let (_db, tree) = family();
        put(&tree, b"k", 1, b"v");
        delete(&tree, b"k", 4);

        assert_eq!(compact_family(&tree, 2).unwrap(), 0);
        assert_eq!(tree.len(), 2);
    }

    #[test]
    fn test_families_compacted_in_chunks() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let families: Vec<Tree> = (0..5).map(|i| db.open_tree(format!("f{}", i)).unwrap()).collect();
        for tree in &families {
            put(tree, b"k", 1, b"old");
            put(tree, b"k", 2, b"new");
        }

        assert_eq!(compact_families(&families, 2, 2).unwrap(), 5);
        assert!(families.iter().all(|tree| tree.len() == 1));
    }
}
