//! Unique 64-bit identifier allocation
//!
//! Event IDs and consumer IDs come from one process-wide [`IdAllocator`],
//! constructed once at startup and shared by the broker.
//!
//! The production allocator is a snowflake generator. Each ID packs:
//! - 41 bits: milliseconds since [`SnowflakeAllocator::DEFAULT_EPOCH`]
//! - 10 bits: worker ID
//! - 12 bits: per-millisecond sequence
//!
//! Allocation can fail (the wall clock moved backwards, or is earlier than the
//! epoch). Callers inside the broker never propagate that failure: they use
//! [`allocate_or_zero`], which logs and degrades the ID to `0`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

/// Why an identifier could not be allocated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// The system clock reported a time before the Unix epoch
    #[error("system clock is before the Unix epoch")]
    ClockUnavailable,

    /// The system clock is earlier than the allocator epoch
    #[error("timestamp {timestamp_ms} occurs before configured epoch {epoch_ms}")]
    BeforeEpoch {
        /// Current time in milliseconds since the Unix epoch
        timestamp_ms: u64,
        /// Configured allocator epoch
        epoch_ms: u64,
    },

    /// The system clock moved backwards since the last allocation
    #[error("clock moved backwards, refusing to allocate for {millis} milliseconds")]
    ClockMovedBackwards {
        /// How far the clock went back
        millis: u64,
    },

    /// Worker ID does not fit in 10 bits
    #[error("worker id {0} exceeds maximum {max}", max = SnowflakeAllocator::MAX_WORKER_ID)]
    WorkerIdOutOfRange(u16),

    /// The allocator state lock was poisoned by a panicking thread
    #[error("id allocator state poisoned")]
    Poisoned,

    /// The allocator has no identifiers left
    #[error("id space exhausted")]
    Exhausted,
}

/// Source of process-wide unique identifiers
pub trait IdAllocator: fmt::Debug + Send + Sync {
    /// Allocate the next identifier
    fn next_id(&self) -> Result<u64, IdError>;
}

/// Allocate an ID, degrading to `0` when the allocator fails
///
/// `purpose` names what the ID is for in the warning that gets logged.
pub fn allocate_or_zero(ids: &dyn IdAllocator, purpose: &'static str) -> u64 {
    match ids.next_id() {
        Ok(id) => id,
        Err(error) => {
            tracing::warn!(%error, purpose, "id allocation failed, falling back to 0");
            0
        }
    }
}

/// Snowflake ID generator for time-ordered unique identifiers
#[derive(Debug)]
pub struct SnowflakeAllocator {
    worker_id: u16,
    epoch: u64,
    state: Mutex<SnowflakeState>,
}

#[derive(Debug, Default)]
struct SnowflakeState {
    last_timestamp: u64,
    sequence: u16,
}

impl SnowflakeAllocator {
    /// Custom epoch: 2024-01-01 00:00:00 UTC
    pub const DEFAULT_EPOCH: u64 = 1_704_067_200_000;

    /// Maximum worker ID
    pub const MAX_WORKER_ID: u16 = 1023;

    const MAX_SEQUENCE: u16 = 4095;

    /// Create an allocator for `worker_id` using the default epoch
    pub fn new(worker_id: u16) -> Result<Self, IdError> {
        Self::with_epoch(worker_id, Self::DEFAULT_EPOCH)
    }

    /// Create an allocator with a custom epoch (milliseconds since the Unix epoch)
    pub fn with_epoch(worker_id: u16, epoch: u64) -> Result<Self, IdError> {
        if worker_id > Self::MAX_WORKER_ID {
            return Err(IdError::WorkerIdOutOfRange(worker_id));
        }

        Ok(Self {
            worker_id,
            epoch,
            state: Mutex::new(SnowflakeState::default()),
        })
    }

    /// Worker ID embedded in every allocated identifier
    pub fn worker_id(&self) -> u16 {
        self.worker_id
    }

    /// Extract the timestamp (milliseconds since the Unix epoch) from an ID
    pub fn timestamp_of(&self, id: u64) -> u64 {
        (id >> 22) + self.epoch
    }

    /// Extract the worker ID from an ID
    pub fn worker_of(id: u64) -> u16 {
        ((id >> 12) & 0x3FF) as u16
    }

    fn now_millis() -> Result<u64, IdError> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .map_err(|_| IdError::ClockUnavailable)
    }

    fn wait_next_millis(last_timestamp: u64) -> Result<u64, IdError> {
        let mut timestamp = Self::now_millis()?;
        while timestamp <= last_timestamp {
            std::hint::spin_loop();
            timestamp = Self::now_millis()?;
        }
        Ok(timestamp)
    }
}

impl IdAllocator for SnowflakeAllocator {
    fn next_id(&self) -> Result<u64, IdError> {
        let mut state = self.state.lock().map_err(|_| IdError::Poisoned)?;

        let mut timestamp = Self::now_millis()?;
        if timestamp < self.epoch {
            return Err(IdError::BeforeEpoch {
                timestamp_ms: timestamp,
                epoch_ms: self.epoch,
            });
        }

        if timestamp < state.last_timestamp {
            return Err(IdError::ClockMovedBackwards {
                millis: state.last_timestamp - timestamp,
            });
        }

        if timestamp == state.last_timestamp {
            state.sequence = (state.sequence + 1) & Self::MAX_SEQUENCE;
            if state.sequence == 0 {
                // sequence overflow
                timestamp = Self::wait_next_millis(state.last_timestamp)?;
            }
        } else {
            state.sequence = 0;
        }

        state.last_timestamp = timestamp;

        Ok(((timestamp - self.epoch) << 22)
            | (u64::from(self.worker_id) << 12)
            | u64::from(state.sequence))
    }
}

/// Counter-backed allocator handing out 1, 2, 3, ...
///
/// Deterministic, so it suits tests and embedded uses where IDs only need to
/// be unique within one process run.
#[derive(Debug)]
pub struct SequentialAllocator {
    next: AtomicU64,
}

impl SequentialAllocator {
    /// Start allocating at 1
    pub fn new() -> Self {
        Self::starting_at(1)
    }

    /// Start allocating at `first`
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }
}

impl Default for SequentialAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator for SequentialAllocator {
    fn next_id(&self) -> Result<u64, IdError> {
        self.next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_add(1))
            .map_err(|_| IdError::Exhausted)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    /// Allocator that always fails, for exercising the fallback paths
    #[derive(Debug)]
    pub(crate) struct FailingAllocator;

    impl IdAllocator for FailingAllocator {
        fn next_id(&self) -> Result<u64, IdError> {
            Err(IdError::ClockMovedBackwards { millis: 5 })
        }
    }

    #[test]
    fn test_snowflake_uniqueness() {
        let ids = SnowflakeAllocator::new(1).unwrap();
        let mut seen = HashSet::new();

        for _ in 0..10_000 {
            let id = ids.next_id().unwrap();
            assert!(id > 0);
            assert!(seen.insert(id), "duplicate id generated: {id}");
        }
    }

    #[test]
    fn test_snowflake_ordering() {
        let ids = SnowflakeAllocator::new(1).unwrap();
        let mut last = 0;

        for _ in 0..1000 {
            let id = ids.next_id().unwrap();
            assert!(id > last, "ids not in order: {id} <= {last}");
            last = id;
        }
    }

    #[test]
    fn test_snowflake_embeds_worker_and_time() {
        let ids = SnowflakeAllocator::new(42).unwrap();
        let id = ids.next_id().unwrap();

        assert_eq!(SnowflakeAllocator::worker_of(id), 42);

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        assert!(now.abs_diff(ids.timestamp_of(id)) < 1000);
    }

    #[test]
    fn test_worker_id_out_of_range() {
        let err = SnowflakeAllocator::new(2000).unwrap_err();
        assert_eq!(err, IdError::WorkerIdOutOfRange(2000));
        assert!(SnowflakeAllocator::new(SnowflakeAllocator::MAX_WORKER_ID).is_ok());
    }

    #[test]
    fn test_epoch_in_the_future_fails() {
        let ids = SnowflakeAllocator::with_epoch(0, u64::MAX).unwrap();
        assert!(matches!(ids.next_id(), Err(IdError::BeforeEpoch { .. })));
    }

    #[test]
    fn test_concurrent_generation() {
        let ids = Arc::new(SnowflakeAllocator::new(1).unwrap());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let ids = Arc::clone(&ids);
                thread::spawn(move || (0..100).map(|_| ids.next_id().unwrap()).collect::<Vec<_>>())
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(all.insert(id), "duplicate id in concurrent test");
            }
        }
        assert_eq!(all.len(), 1000);
    }

    #[test]
    fn test_sequential_allocator() {
        let ids = SequentialAllocator::new();
        assert_eq!(ids.next_id().unwrap(), 1);
        assert_eq!(ids.next_id().unwrap(), 2);

        let full = SequentialAllocator::starting_at(u64::MAX);
        assert_eq!(full.next_id(), Err(IdError::Exhausted));
    }

    #[test]
    fn test_allocate_or_zero() {
        assert_eq!(allocate_or_zero(&SequentialAllocator::starting_at(7), "event"), 7);
        assert_eq!(allocate_or_zero(&FailingAllocator, "event"), 0);
    }
}
