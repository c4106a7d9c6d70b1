//! Fixed-capacity batch of encoded records.

use crate::core::record::EncodedRecord;

/// Upper bound on records per batch, reached at the shortest accepted
/// sample period.
pub const MAX_BATCH_RECORDS: usize = 100;

/// Records per batch for a sample period: one second's worth of ticks,
/// `ceil(1 / period)`, clamped to `1..=MAX_BATCH_RECORDS`.
///
/// The epsilon keeps exact reciprocals (period 1/3 -> 3) from rounding up.
pub fn capacity_for_period(period_secs: f64) -> usize {
    if !period_secs.is_finite() || period_secs <= 0.0 {
        return 1;
    }
    let ticks = ((1.0 / period_secs) - 1e-9).ceil();
    if ticks >= MAX_BATCH_RECORDS as f64 {
        return MAX_BATCH_RECORDS;
    }
    ticks.max(1.0) as usize
}

/// Bounded, insertion-ordered record queue owned by the sampling task.
///
/// Inserts never block: a full buffer hands the record back unchanged.
#[derive(Debug)]
pub struct BatchBuffer {
    records: Vec<EncodedRecord>,
    capacity: usize,
}

impl BatchBuffer {
    /// A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Vec::with_capacity(capacity.min(MAX_BATCH_RECORDS)),
            capacity,
        }
    }

    /// Appends `record`, or returns it in `Err` without touching the buffer
    /// when it is already at capacity.
    pub fn try_insert(&mut self, record: EncodedRecord) -> Result<(), EncodedRecord> {
        if self.is_full() {
            return Err(record);
        }
        self.records.push(record);
        Ok(())
    }

    /// True once the buffer holds `capacity` records; the next insert fails.
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    /// True when there is nothing to flush.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Takes every record in insertion order and leaves the buffer empty.
    pub fn drain_all(&mut self) -> Vec<EncodedRecord> {
        std::mem::replace(
            &mut self.records,
            Vec::with_capacity(self.capacity.min(MAX_BATCH_RECORDS)),
        )
    }
}
