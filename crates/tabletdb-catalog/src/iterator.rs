//! Row and window iterators over per-partition storage cursors

use tabletdb_storage::TraverseIterator;

use crate::vm::{Row, RowIterator, WindowIterator};

fn to_row(bytes: Option<&[u8]>) -> Row {
    bytes.map(Row::copy_from_slice).unwrap_or_default()
}

/// Iterator that is never valid
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyRowIterator;

impl RowIterator for EmptyRowIterator {
    fn valid(&self) -> bool {
        false
    }

    fn next(&mut self) {}

    fn seek(&mut self, _key: &[u8]) {}

    fn seek_to_first(&mut self) {}

    fn key(&self) -> Row {
        Row::default()
    }

    fn value(&self) -> Row {
        Row::default()
    }
}

/// Rows sharing one key, positioned at the first of them
#[derive(Debug, Clone)]
pub struct KeyRowIterator {
    key: Row,
    rows: Vec<Row>,
    pos: usize,
}

impl KeyRowIterator {
    pub fn new(key: Row, rows: Vec<Row>) -> Self {
        Self { key, rows, pos: 0 }
    }
}

impl RowIterator for KeyRowIterator {
    fn valid(&self) -> bool {
        self.pos < self.rows.len()
    }

    fn next(&mut self) {
        if self.valid() {
            self.pos += 1;
        }
    }

    fn seek(&mut self, key: &[u8]) {
        self.pos = if key <= self.key.as_bytes() { 0 } else { self.rows.len() };
    }

    fn seek_to_first(&mut self) {
        self.pos = 0;
    }

    fn key(&self) -> Row {
        if self.valid() {
            self.key.clone()
        } else {
            Row::default()
        }
    }

    fn value(&self) -> Row {
        self.rows.get(self.pos).cloned().unwrap_or_default()
    }
}

/// Rows of every partition, one partition after another in pid order
pub struct FullTableIterator {
    cursors: Vec<TraverseIterator>,
    current: usize,
    /// Bound of the last seek; later partitions start from it
    lower: Option<Vec<u8>>,
}

impl FullTableIterator {
    pub fn new(cursors: Vec<TraverseIterator>) -> Self {
        let current = cursors.len();
        Self {
            cursors,
            current,
            lower: None,
        }
    }

    fn cursor(&self) -> Option<&TraverseIterator> {
        self.cursors.get(self.current).filter(|cursor| cursor.valid())
    }

    fn position(&mut self) {
        let lower = self.lower.as_deref();
        if let Some(cursor) = self.cursors.get_mut(self.current) {
            match lower {
                Some(key) => cursor.seek(key),
                None => cursor.seek_to_first(),
            }
        }
    }

    /// Move past exhausted partitions, positioning each new one at the seek bound
    fn skip_exhausted(&mut self) {
        while self.current < self.cursors.len() && !self.cursors[self.current].valid() {
            self.current += 1;
            self.position();
        }
    }
}

impl RowIterator for FullTableIterator {
    fn valid(&self) -> bool {
        self.cursor().is_some()
    }

    fn next(&mut self) {
        if let Some(cursor) = self.cursors.get_mut(self.current) {
            cursor.next();
            self.skip_exhausted();
        }
    }

    fn seek(&mut self, key: &[u8]) {
        self.lower = Some(key.to_vec());
        self.current = 0;
        self.position();
        self.skip_exhausted();
    }

    fn seek_to_first(&mut self) {
        self.lower = None;
        self.current = 0;
        self.position();
        self.skip_exhausted();
    }

    fn key(&self) -> Row {
        to_row(self.cursor().and_then(TraverseIterator::key))
    }

    fn value(&self) -> Row {
        to_row(self.cursor().and_then(TraverseIterator::value))
    }
}

/// Keys of one index across partitions in byte order.
///
/// Every partition contributes at most one row per key; the group under a key
/// lists them in pid order.
pub struct MergedWindowIterator {
    cursors: Vec<TraverseIterator>,
    current: Option<Vec<u8>>,
}

impl MergedWindowIterator {
    pub fn new(cursors: Vec<TraverseIterator>) -> Self {
        Self {
            cursors,
            current: None,
        }
    }

    fn settle(&mut self) {
        self.current = self
            .cursors
            .iter()
            .filter_map(TraverseIterator::key)
            .min()
            .map(<[u8]>::to_vec);
    }

    fn group(&self) -> Vec<Row> {
        let Some(current) = self.current.as_deref() else {
            return Vec::new();
        };
        self.cursors
            .iter()
            .filter(|cursor| cursor.key() == Some(current))
            .map(|cursor| to_row(cursor.value()))
            .collect()
    }
}

impl WindowIterator for MergedWindowIterator {
    fn seek(&mut self, key: &[u8]) {
        for cursor in &mut self.cursors {
            cursor.seek(key);
        }
        self.settle();
    }

    fn seek_to_first(&mut self) {
        for cursor in &mut self.cursors {
            cursor.seek_to_first();
        }
        self.settle();
    }

    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn next(&mut self) {
        let Some(current) = self.current.take() else {
            return;
        };
        for cursor in &mut self.cursors {
            if cursor.key() == Some(current.as_slice()) {
                cursor.next();
            }
        }
        self.settle();
    }

    fn key(&self) -> Row {
        to_row(self.current.as_deref())
    }

    fn value(&self) -> Box<dyn RowIterator> {
        Box::new(KeyRowIterator::new(self.key(), self.group()))
    }
}

/// Every row of one index in key order, flattening the window groups
pub struct MergedRowIterator {
    window: MergedWindowIterator,
    group: Vec<Row>,
    pos: usize,
}

impl MergedRowIterator {
    pub fn new(window: MergedWindowIterator) -> Self {
        Self {
            window,
            group: Vec::new(),
            pos: 0,
        }
    }

    fn load(&mut self) {
        self.group = self.window.group();
        self.pos = 0;
    }
}

impl RowIterator for MergedRowIterator {
    fn valid(&self) -> bool {
        self.pos < self.group.len()
    }

    fn next(&mut self) {
        if !self.valid() {
            return;
        }
        self.pos += 1;
        if self.pos >= self.group.len() {
            self.window.next();
            self.load();
        }
    }

    fn seek(&mut self, key: &[u8]) {
        self.window.seek(key);
        self.load();
    }

    fn seek_to_first(&mut self) {
        self.window.seek_to_first();
        self.load();
    }

    fn key(&self) -> Row {
        if self.valid() {
            self.window.key()
        } else {
            Row::default()
        }
    }

    fn value(&self) -> Row {
        self.group.get(self.pos).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use tabletdb_common::config::StorageConfig;
    use tabletdb_common::types::{ColumnDesc, DataType, Dimension, TableMeta};
    use tabletdb_storage::{RelationalTable, TierTemplates};
    use tempfile::TempDir;

    fn partition(dir: &TempDir, pid: u32, keys: &[&str]) -> RelationalTable {
        let meta = TableMeta::new("db", "t", 7, pid).with_column(ColumnDesc::index("k", DataType::String));
        let mut table = RelationalTable::new(
            meta,
            dir.path(),
            Arc::new(TierTemplates::new(&StorageConfig::default())),
        );
        table.init().unwrap();
        for key in keys {
            let row = format!("{}@{}", key, pid);
            table.put_dimensions(row.as_bytes(), &[Dimension::new(*key, 0)]).unwrap();
        }
        table
    }

    fn rows(it: &mut dyn RowIterator) -> Vec<String> {
        let mut out = Vec::new();
        while it.valid() {
            out.push(String::from_utf8(it.value().as_bytes().to_vec()).unwrap());
            it.next();
        }
        out
    }

    #[test]
    fn test_empty_iterator() {
        let mut it = EmptyRowIterator;
        it.seek_to_first();
        assert!(!it.valid());
        assert!(it.value().is_empty());
    }

    #[test]
    fn test_key_row_iterator_seek() {
        let mut it = KeyRowIterator::new(Row::from("k"), vec![Row::from("r1"), Row::from("r2")]);
        assert_eq!(rows(&mut it), vec!["r1", "r2"]);
        it.seek(b"a");
        assert_eq!(it.key(), Row::from("k"));
        it.seek(b"z");
        assert!(!it.valid());
    }

    #[test]
    fn test_full_table_iterator_chains_partitions() {
        let dir = TempDir::new().unwrap();
        let empty = partition(&dir, 0, &[]);
        let first = partition(&dir, 1, &["b", "a"]);
        let second = partition(&dir, 2, &["c"]);
        let cursors = vec![
            empty.new_traverse(0).unwrap(),
            first.new_traverse(0).unwrap(),
            second.new_traverse(0).unwrap(),
        ];

        let mut it = FullTableIterator::new(cursors);
        assert!(!it.valid());
        it.seek_to_first();
        assert_eq!(rows(&mut it), vec!["a@1", "b@1", "c@2"]);

        it.seek(b"c");
        assert_eq!(it.value(), Row::from("c@2"));
    }

    #[test]
    fn test_full_table_seek_bounds_later_partitions() {
        let dir = TempDir::new().unwrap();
        let first = partition(&dir, 0, &["c"]);
        let second = partition(&dir, 1, &["a", "d"]);
        let cursors = vec![first.new_traverse(0).unwrap(), second.new_traverse(0).unwrap()];

        let mut it = FullTableIterator::new(cursors);
        it.seek(b"b");
        assert_eq!(rows(&mut it), vec!["c@0", "d@1"]);

        it.seek_to_first();
        assert_eq!(rows(&mut it), vec!["c@0", "a@1", "d@1"]);
    }

    #[test]
    fn test_merged_window_groups_by_key() {
        let dir = TempDir::new().unwrap();
        let first = partition(&dir, 0, &["a", "c"]);
        let second = partition(&dir, 1, &["b", "c"]);

        let mut window =
            MergedWindowIterator::new(vec![first.new_traverse(0).unwrap(), second.new_traverse(0).unwrap()]);
        window.seek_to_first();

        let mut keys = Vec::new();
        while window.valid() {
            let key = String::from_utf8(window.key().as_bytes().to_vec()).unwrap();
            keys.push((key, rows(window.value().as_mut())));
            window.next();
        }
        assert_eq!(
            keys,
            vec![
                ("a".to_string(), vec!["a@0".to_string()]),
                ("b".to_string(), vec!["b@1".to_string()]),
                ("c".to_string(), vec!["c@0".to_string(), "c@1".to_string()]),
            ]
        );

        window.seek(b"bb");
        assert_eq!(window.key(), Row::from("c"));
    }

    #[test]
    fn test_merged_rows_flatten_groups() {
        let dir = TempDir::new().unwrap();
        let first = partition(&dir, 0, &["x", "y"]);
        let second = partition(&dir, 1, &["x"]);

        let window =
            MergedWindowIterator::new(vec![first.new_traverse(0).unwrap(), second.new_traverse(0).unwrap()]);
        let mut it = MergedRowIterator::new(window);
        it.seek_to_first();
        assert_eq!(rows(&mut it), vec!["x@0", "x@1", "y@0"]);
    }
}
