use std::collections::HashMap;
use std::sync::Arc;

use crate::error::WarehouseError;
use crate::record::Record;
use crate::transform::transform;
use crate::warehouse::{TableRef, Warehouse};

const SAMPLE_SIZE: usize = 3;

/// Buffers records up to a hard capacity, then flushes them through
/// [`transform`] into the warehouse and releases the buffer. Owned
/// exclusively by the orchestrator; never shared.
///
/// Tracks cumulative totals (`total_loaded`, `flush_count`) across every
/// flush it has ever performed, separate from the unflushed buffer's own
/// `len`. The Fetch Engine accumulates into this directly as pages arrive,
/// so the totals stay accurate even if a later page fails and the run
/// aborts mid-fetch.
pub struct BatchLoader {
    buffer: Vec<Record>,
    capacity: usize,
    table: TableRef,
    column_mapping: HashMap<String, String>,
    warehouse: Arc<dyn Warehouse>,
    total_loaded: usize,
    flush_count: usize,
    sample: Vec<Record>,
}

impl BatchLoader {
    pub fn new(
        capacity: usize,
        table: TableRef,
        column_mapping: HashMap<String, String>,
        warehouse: Arc<dyn Warehouse>,
    ) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity.min(1024)),
            capacity,
            table,
            column_mapping,
            warehouse,
            total_loaded: 0,
            flush_count: 0,
            sample: Vec::with_capacity(SAMPLE_SIZE),
        }
    }

    /// Appends `record`, flushing automatically once the buffer reaches
    /// capacity. Returns the number of records loaded, if a flush was
    /// triggered.
    pub async fn accumulate(&mut self, record: Record) -> Result<Option<usize>, WarehouseError> {
        if self.sample.len() < SAMPLE_SIZE {
            self.sample.push(record.clone());
        }
        self.buffer.push(record);
        if self.buffer.len() >= self.capacity {
            return Ok(Some(self.flush().await?));
        }
        Ok(None)
    }

    /// Transforms and loads the whole buffer, then clears it. A no-op
    /// returning `0` when the buffer is empty.
    pub async fn flush(&mut self) -> Result<usize, WarehouseError> {
        if self.buffer.is_empty() {
            return Ok(0);
        }
        let batch = std::mem::take(&mut self.buffer);
        let transformed = transform(batch, &self.column_mapping);
        let loaded = self.warehouse.load_batch(&self.table, &transformed).await?;
        self.total_loaded += loaded;
        self.flush_count += 1;
        Ok(loaded)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Records loaded across every flush so far, including flushes
    /// triggered automatically mid-fetch. Stays accurate even if a
    /// later flush fails and the run aborts.
    pub fn total_loaded(&self) -> usize {
        self.total_loaded
    }

    /// Flushes completed so far, including automatic ones.
    pub fn flush_count(&self) -> usize {
        self.flush_count
    }

    /// The first few records seen, for a run summary's eyeball sample.
    pub fn sample(&self) -> &[Record] {
        &self.sample
    }
}
