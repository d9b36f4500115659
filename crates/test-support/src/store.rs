use async_trait::async_trait;
use bytes::Bytes;
use coordinator::{LocalStore, StoreError};
use filters::BloomFilter;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use wire::{Mutation, ReadCommand, ReadResponse, Row};

struct TableState {
    rows: HashMap<Bytes, Row>,
    bloom: BloomFilter,
}

impl TableState {
    fn new() -> Self {
        Self {
            rows: HashMap::new(),
            bloom: BloomFilter::with_buckets(4096, 10),
        }
    }
}

/// An in-memory `LocalStore` with the read path fronted by a Bloom filter,
/// the way the real storage engine fronts its sstables.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, TableState>>,
    flushed: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Place a row directly, bypassing the write path.
    pub fn seed(&self, table: &str, key: &[u8], row: Row) {
        let mut tables = self.tables.lock().unwrap();
        let state = tables.entry(table.to_string()).or_insert_with(TableState::new);
        state.bloom.add_bytes(key);
        state.rows.insert(Bytes::copy_from_slice(key), row);
    }

    /// The stored version of a row, if any.
    pub fn row(&self, table: &str, key: &[u8]) -> Option<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .and_then(|state| state.rows.get(key).cloned())
    }

    /// Tables flushed so far, in order.
    pub fn flushed(&self) -> Vec<String> {
        self.flushed.lock().unwrap().clone()
    }
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn apply(&self, mutation: &Mutation) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().unwrap();
        let state = tables
            .entry(mutation.table.clone())
            .or_insert_with(TableState::new);
        state.bloom.add_bytes(&mutation.key);
        state
            .rows
            .entry(mutation.key.clone())
            .or_default()
            .merge(&mutation.row);
        Ok(())
    }

    async fn read(&self, command: &ReadCommand) -> Result<ReadResponse, StoreError> {
        let tables = self.tables.lock().unwrap();
        let row = match tables.get(&command.table) {
            // The filter short-circuits keys this replica never saw.
            Some(state) if state.bloom.contains_bytes(&command.key) => state
                .rows
                .get(&command.key)
                .cloned()
                .unwrap_or_default(),
            _ => Row::default(),
        };
        Ok(if command.digest_only {
            ReadResponse::Digest(Bytes::copy_from_slice(&row.digest()))
        } else {
            ReadResponse::Data(row)
        })
    }

    async fn flush(&self, table: &str) -> Result<(), StoreError> {
        self.flushed.lock().unwrap().push(table.to_string());
        Ok(())
    }
}
