#[cfg(feature = "sim")]
pub mod sim;

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaqError {
    #[error("no DAQ devices found")]
    NoDevices,

    #[error("failed to allocate a scan buffer of {0} samples")]
    Allocation(usize),

    #[error("device busy: {0}")]
    Busy(String),

    #[error("device fault: {0}")]
    Fault(String),
}

/// Identity of a discovered DAQ board.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub board_num: u32,
    pub product_name: String,
    pub product_id: u16,
}

/// Analog input capability reported by a board.
#[derive(Debug, Clone)]
pub struct AiCapability {
    pub num_chans: u8,
    /// Transfer granularity: points per channel must be a multiple of this.
    pub packet_size: usize,
    pub supported_ranges: Vec<VoltageRange>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VoltageRange {
    Bip10Volts,
    Bip5Volts,
    Bip2Volts,
    Bip1Volts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum InputMode {
    #[default]
    SingleEnded,

    Differential,
}

/// Raw scan state as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    Idle,
    Running,
}

/// Everything the driver needs to arm a continuous background scan.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub low_chan: u8,
    pub high_chan: u8,
    /// Total samples in the circular scan buffer, all channels interleaved.
    pub ring_capacity: usize,
    /// Samples per second per channel.
    pub rate: f64,
    pub range: VoltageRange,
}

/// Vendor boundary for a DAQ board. The background scan writes scaled samples
/// into a circular buffer owned by the device; the consumer observes progress
/// through `status` and copies data out with `read_scaled`.
pub trait DaqDevice: Debug + Send {
    fn info(&self) -> &DeviceInfo;

    /// Analog input capability, or `None` if the board has no analog inputs.
    fn ai_capability(&self) -> Option<AiCapability>;

    /// Apply per-channel input settings before scanning.
    fn configure_channels(&mut self, channels: &[u8], mode: InputMode) -> Result<(), DaqError>;

    /// Allocate the scaled ring and arm the continuous background scan.
    fn start_background_scan(&mut self, request: &ScanRequest) -> Result<(), DaqError>;

    /// Non-blocking query: scan state, total samples written since start, and
    /// the current write index into the ring.
    fn status(&mut self) -> Result<(ScanStatus, u64, usize), DaqError>;

    /// Copy `out.len()` scaled samples starting at ring index `start`.
    /// The region must not extend past the end of the ring.
    fn read_scaled(&self, start: usize, out: &mut [f64]) -> Result<(), DaqError>;

    /// Stop the background scan. Safe to call when no scan is armed.
    fn stop_background(&mut self) -> Result<(), DaqError>;

    /// Release the board. Called exactly once by the owning session.
    fn release(&mut self) -> Result<(), DaqError>;
}
