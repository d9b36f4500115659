use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

pub type Digest = [u8; 16];

/// One column version: a value, its write timestamp, and whether the write
/// was a deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub value: Bytes,
    pub timestamp: i64,
    pub tombstone: bool,
}

impl Column {
    pub fn live(value: impl Into<Bytes>, timestamp: i64) -> Self {
        Self {
            value: value.into(),
            timestamp,
            tombstone: false,
        }
    }

    pub fn deleted(timestamp: i64) -> Self {
        Self {
            value: Bytes::new(),
            timestamp,
            tombstone: true,
        }
    }

    /// Last write wins; at equal timestamps a tombstone beats a live write,
    /// and value bytes break the remaining tie so merge order cannot matter.
    fn supersedes(&self, other: &Column) -> bool {
        (self.timestamp, self.tombstone, &self.value)
            > (other.timestamp, other.tombstone, &other.value)
    }
}

/// One version of a row: named columns in canonical (sorted) order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    columns: BTreeMap<Bytes, Column>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<Bytes>, value: impl Into<Bytes>, timestamp: i64) {
        self.columns.insert(name.into(), Column::live(value, timestamp));
    }

    pub fn delete(&mut self, name: impl Into<Bytes>, timestamp: i64) {
        self.columns.insert(name.into(), Column::deleted(timestamp));
    }

    pub fn insert(&mut self, name: impl Into<Bytes>, column: Column) {
        self.columns.insert(name.into(), column);
    }

    pub fn get(&self, name: &[u8]) -> Option<&Column> {
        self.columns.get(name)
    }

    pub fn columns(&self) -> impl Iterator<Item = (&Bytes, &Column)> {
        self.columns.iter()
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Fold `other` in, column by column.
    pub fn merge(&mut self, other: &Row) {
        for (name, theirs) in &other.columns {
            match self.columns.get(name) {
                Some(ours) if !theirs.supersedes(ours) => {}
                _ => {
                    self.columns.insert(name.clone(), theirs.clone());
                }
            }
        }
    }

    /// The superset version of a set of row versions.
    pub fn resolve<'a>(versions: impl IntoIterator<Item = &'a Row>) -> Row {
        let mut resolved = Row::new();
        for version in versions {
            resolved.merge(version);
        }
        resolved
    }

    /// The columns of `resolved` that this version lacks or holds stale, or
    /// None when this version is already up to date.
    pub fn diff(&self, resolved: &Row) -> Option<Row> {
        let mut out = Row::new();
        for (name, theirs) in &resolved.columns {
            let stale = match self.columns.get(name) {
                Some(ours) => theirs.supersedes(ours),
                None => true,
            };
            if stale {
                out.columns.insert(name.clone(), theirs.clone());
            }
        }
        (!out.is_empty()).then_some(out)
    }

    pub fn digest(&self) -> Digest {
        let mut buf = BytesMut::new();
        self.encode(&mut buf);
        md5::compute(&buf).0
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.columns.len() as u32);
        for (name, column) in &self.columns {
            buf.put_u16(name.len() as u16);
            buf.put_slice(name);
            buf.put_u8(column.tombstone as u8);
            buf.put_i64(column.timestamp);
            buf.put_u32(column.value.len() as u32);
            buf.put_slice(&column.value);
        }
    }

    pub fn decode(buf: &mut impl Buf) -> Result<Row, WireError> {
        if buf.remaining() < 4 {
            return Err(WireError::Truncated("row header"));
        }
        let count = buf.get_u32();
        let mut row = Row::new();
        for _ in 0..count {
            if buf.remaining() < 2 {
                return Err(WireError::Truncated("column name length"));
            }
            let name_len = buf.get_u16() as usize;
            if buf.remaining() < name_len {
                return Err(WireError::Truncated("column name"));
            }
            let name = buf.copy_to_bytes(name_len);
            if buf.remaining() < 1 + 8 + 4 {
                return Err(WireError::Truncated("column header"));
            }
            let tombstone = buf.get_u8() != 0;
            let timestamp = buf.get_i64();
            let value_len = buf.get_u32() as usize;
            if buf.remaining() < value_len {
                return Err(WireError::Truncated("column value"));
            }
            let value = buf.copy_to_bytes(value_len);
            row.insert(
                name,
                Column {
                    value,
                    timestamp,
                    tombstone,
                },
            );
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(columns: &[(&str, &str, i64)]) -> Row {
        let mut out = Row::new();
        for (name, value, timestamp) in columns {
            out.set(name.as_bytes().to_vec(), value.as_bytes().to_vec(), *timestamp);
        }
        out
    }

    #[test]
    fn newer_timestamp_wins() {
        let mut base = row(&[("c1", "old", 10)]);
        base.merge(&row(&[("c1", "new", 20)]));
        assert_eq!(base.get(b"c1").unwrap().value, "new".as_bytes());

        // Stale merges change nothing.
        base.merge(&row(&[("c1", "stale", 5)]));
        assert_eq!(base.get(b"c1").unwrap().value, "new".as_bytes());
    }

    #[test]
    fn tombstone_beats_live_write_at_equal_timestamp() {
        let mut base = row(&[("c1", "live", 10)]);
        let mut deletion = Row::new();
        deletion.delete(&b"c1"[..], 10);

        base.merge(&deletion);
        assert!(base.get(b"c1").unwrap().tombstone);
    }

    #[test]
    fn resolve_is_idempotent_and_order_free() {
        let v1 = row(&[("c1", "x", 10)]);
        let v2 = row(&[("c1", "x", 10), ("c2", "y", 5)]);
        let v3 = row(&[("c2", "z", 7)]);

        assert_eq!(Row::resolve([&v1]), v1);
        assert_eq!(Row::resolve([&v1, &v2]), Row::resolve([&v2, &v1]));

        let resolved = Row::resolve([&v1, &v2, &v3]);
        assert_eq!(Row::resolve([&v1, &v2, &v3, &resolved]), resolved);
        assert_eq!(resolved.get(b"c2").unwrap().value, "z".as_bytes());
    }

    #[test]
    fn diff_carries_only_missing_or_stale_columns() {
        let resolved = row(&[("c1", "x", 10), ("c2", "y", 5)]);

        let behind = row(&[("c1", "x", 10)]);
        let repair = behind.diff(&resolved).unwrap();
        assert_eq!(repair.len(), 1);
        assert_eq!(repair.get(b"c2").unwrap().value, "y".as_bytes());

        assert!(resolved.diff(&resolved).is_none());
        assert!(row(&[("c1", "x", 10), ("c2", "y", 5)]).diff(&resolved).is_none());
    }

    #[test]
    fn digests_match_exactly_on_equal_versions() {
        let a = row(&[("c1", "x", 10), ("c2", "y", 5)]);
        let b = row(&[("c2", "y", 5), ("c1", "x", 10)]);
        assert_eq!(a.digest(), b.digest());

        let c = row(&[("c1", "x", 11), ("c2", "y", 5)]);
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn codec_round_trips() {
        let mut original = row(&[("c1", "x", 10)]);
        original.delete(&b"gone"[..], 12);

        let mut buf = BytesMut::new();
        original.encode(&mut buf);
        let decoded = Row::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, original);

        assert!(matches!(
            Row::decode(&mut Bytes::from_static(&[0, 0])),
            Err(WireError::Truncated(_))
        ));
    }
}
