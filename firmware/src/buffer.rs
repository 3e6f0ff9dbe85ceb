//! Bounded sample buffer between the read task and the upload task.
//!
//! Capacity follows the configured timing: roughly one slot per sample
//! expected within an upload window, plus margin, clamped to `[5, 100]`.
//! The buffer is reallocated whenever either interval changes.
//!
//! While an upload is in flight (`upload_lock` set) the writer drops
//! samples rather than mutating the snapshot the compressor is reading.

use log::{info, warn};

use crate::config::{
    BUFFER_CAPACITY_MARGIN, BUFFER_MAX_CAPACITY, BUFFER_MIN_CAPACITY, READ_REGISTER_COUNT,
};

/// One poll of the inverter: a fixed-width vector of register values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterReading {
    pub values: [u16; READ_REGISTER_COUNT],
}

impl RegisterReading {
    pub const fn zeroed() -> Self {
        Self {
            values: [0; READ_REGISTER_COUNT],
        }
    }

    /// Build a reading from up to `READ_REGISTER_COUNT` decoded values;
    /// missing trailing registers stay zero.
    pub fn from_slice(values: &[u16]) -> Self {
        let mut reading = Self::zeroed();
        let n = values.len().min(READ_REGISTER_COUNT);
        reading.values[..n].copy_from_slice(&values[..n]);
        reading
    }
}

/// What happens to new samples once the buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FullPolicy {
    /// Drop the newest sample until an upload frees space.
    Stop,
    /// Overwrite the oldest sample (circular).
    Circular,
}

pub struct SampleBuffer {
    readings: Vec<RegisterReading>,
    capacity: usize,
    count: usize,
    write_idx: usize,
    full: bool,
    upload_lock: bool,
    policy: FullPolicy,
}

/// Capacity for the given timing: `ceil(upload/sample) + margin`, clamped.
pub fn capacity_for(upload_interval_ms: u32, sampling_interval_ms: u32) -> usize {
    if sampling_interval_ms == 0 {
        return BUFFER_MIN_CAPACITY;
    }
    let slots = upload_interval_ms.div_ceil(sampling_interval_ms) as usize + BUFFER_CAPACITY_MARGIN;
    slots.clamp(BUFFER_MIN_CAPACITY, BUFFER_MAX_CAPACITY)
}

impl SampleBuffer {
    pub fn new(capacity: usize, policy: FullPolicy) -> Self {
        info!("Buffer: allocated {capacity} slots ({policy:?} mode)");
        Self {
            readings: vec![RegisterReading::zeroed(); capacity],
            capacity,
            count: 0,
            write_idx: 0,
            full: false,
            upload_lock: false,
            policy,
        }
    }

    /// Reallocate for a new capacity, discarding buffered samples.
    pub fn reallocate(&mut self, capacity: usize) {
        self.readings = vec![RegisterReading::zeroed(); capacity];
        self.capacity = capacity;
        self.count = 0;
        self.write_idx = 0;
        self.full = false;
        info!("Buffer: reallocated to {capacity} slots");
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn is_locked(&self) -> bool {
        self.upload_lock
    }

    /// Store one reading. Returns `false` when the sample was dropped
    /// (upload in progress, or full buffer in `Stop` mode).
    pub fn push(&mut self, reading: RegisterReading) -> bool {
        if self.upload_lock {
            warn!("Buffer: sample dropped, upload in progress");
            return false;
        }

        if self.full {
            match self.policy {
                FullPolicy::Stop => {
                    warn!("Buffer: full, dropping sample until next upload");
                    return false;
                }
                FullPolicy::Circular => {
                    // Overwrite the oldest slot; count stays at capacity.
                    self.readings[self.write_idx] = reading;
                    self.write_idx = (self.write_idx + 1) % self.capacity;
                    return true;
                }
            }
        }

        self.readings[self.write_idx] = reading;
        self.write_idx = (self.write_idx + 1) % self.capacity;
        self.count += 1;
        if self.count == self.capacity {
            self.full = true;
            info!("Buffer: full ({} samples, {:?} mode)", self.count, self.policy);
        }
        true
    }

    /// Freeze the buffer for upload: sets the lock and hands out a snapshot
    /// of the buffered readings in write order.
    ///
    /// Must be paired with [`finish_upload`](Self::finish_upload).
    pub fn begin_upload(&mut self) -> Vec<RegisterReading> {
        self.upload_lock = true;
        self.readings[..self.count].to_vec()
    }

    /// Release the lock. A successful upload also clears the buffer; a
    /// failed one leaves the samples for the next cycle.
    pub fn finish_upload(&mut self, success: bool) {
        if success {
            self.count = 0;
            self.write_idx = 0;
            self.full = false;
            for slot in &mut self.readings {
                *slot = RegisterReading::zeroed();
            }
        }
        self.upload_lock = false;
    }
}
