//! Position math and chunk extraction for the circular scan buffer.
//!
//! The hardware reports a monotonically increasing absolute sample count; the
//! write index is that count modulo the ring capacity. Extraction copies a
//! bounded region out of the ring, splitting it into two reads when the region
//! wraps past the end, so the output always preserves temporal order.

use thiserror::Error;

use crate::device::DaqError;

#[derive(Error, Debug)]
pub enum RingError {
    #[error("chunk of {chunk} samples exceeds the ring capacity of {capacity}")]
    InvariantViolation { chunk: usize, capacity: usize },

    #[error(transparent)]
    Device(#[from] DaqError),
}

/// Index into a ring of `capacity` samples for an absolute sample count.
pub fn index_of(count: u64, capacity: usize) -> usize {
    (count % capacity as u64) as usize
}

/// Read-only view of the scaled sample ring filled by the background scan.
pub trait RingRead {
    fn capacity(&self) -> usize;

    /// Copy `out.len()` samples starting at ring index `start`; the region
    /// must not extend past the end of the ring.
    fn read_scaled(&self, start: usize, out: &mut [f64]) -> Result<(), DaqError>;
}

/// Copy `out.len()` samples beginning at ring index `start` into `out`.
///
/// When the region fits below the end of the ring this is a single bounded
/// read; otherwise it is two: the tail of the ring first, then the wrapped
/// head, concatenated in that order. A chunk larger than the ring cannot be
/// extracted coherently and is a programming error, never a runtime
/// condition.
pub fn extract_chunk(ring: &impl RingRead, start: usize, out: &mut [f64]) -> Result<(), RingError> {
    let capacity = ring.capacity();
    let chunk = out.len();
    debug_assert!(
        chunk <= capacity,
        "chunk of {chunk} samples exceeds the ring capacity of {capacity}"
    );
    if chunk > capacity {
        return Err(RingError::InvariantViolation { chunk, capacity });
    }

    if start + chunk <= capacity {
        ring.read_scaled(start, out)?;
    } else {
        let first = capacity - start;
        let (head, tail) = out.split_at_mut(first);
        ring.read_scaled(start, head)?;
        ring.read_scaled(0, tail)?;
    }
    Ok(())
}
