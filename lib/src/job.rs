//! Shared status handle for long-running, pauseable operations.
//!
//! The scheduler, the grid tightener and the correction routines all check a
//! [`JobHandle`] between atomic work items (two scan regions, two lens values,
//! two clusters). Pausing records the progress counter on the operation
//! itself; the handle only carries the status word.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

/// Status of a long-running operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Currently running.
    Active,
    /// Progress is remembered, but the operation is not running.
    Paused,
    /// Progress is forgotten and the operation will not resume.
    Dead,
    /// The operation ran to completion.
    Finished,
}

impl Status {
    fn from_u8(value: u8) -> Status {
        match value {
            0 => Status::Active,
            1 => Status::Paused,
            2 => Status::Dead,
            _ => Status::Finished,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Status::Active => 0,
            Status::Paused => 1,
            Status::Dead => 2,
            Status::Finished => 3,
        }
    }
}

/// Clone-able handle observing and driving the status of one operation.
///
/// All transitions are plain atomic stores: requesting a stop twice is the
/// same as requesting it once, and no transition blocks.
#[derive(Debug, Clone)]
pub struct JobHandle {
    status: Arc<AtomicU8>,
}

impl Default for JobHandle {
    fn default() -> Self {
        JobHandle::new()
    }
}

impl JobHandle {
    /// Creates a handle in the [`Status::Active`] state.
    pub fn new() -> Self {
        JobHandle {
            status: Arc::new(AtomicU8::new(Status::Active.as_u8())),
        }
    }

    /// Returns the current status.
    #[inline]
    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Requests a pause. The operation keeps its progress and returns at the
    /// next suspension point.
    pub fn pause(&self) {
        self.status
            .store(Status::Paused.as_u8(), Ordering::Release);
    }

    /// Makes the handle active again so a paused operation can be re-posted.
    pub fn resume(&self) {
        self.status
            .store(Status::Active.as_u8(), Ordering::Release);
    }

    /// Requests a stop. Idempotent and non-blocking; in-flight work completes
    /// its current atomic step.
    pub fn stop(&self) {
        self.status.store(Status::Dead.as_u8(), Ordering::Release);
    }

    /// Marks the operation as run to completion.
    pub fn finish(&self) {
        self.status
            .store(Status::Finished.as_u8(), Ordering::Release);
    }
}
