use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::device::{AiCapability, InputMode, VoltageRange};

/// Smallest per-channel allocation the driver accepts.
const MIN_POINTS_PER_CHANNEL: usize = 10;
/// The ring is drained in chunks of a tenth of its capacity.
const CHUNKS_PER_RING: usize = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("device '{0}' does not support analog input")]
    UnsupportedDevice(String),

    #[error("invalid channel selection: {0}")]
    InvalidChannelSelection(String),

    #[error("sample rate must be positive, got {0}")]
    InvalidRate(f64),

    #[error("device does not support the {0:?} range")]
    UnsupportedRange(VoltageRange),

    #[error("number of buffers to write must be at least 1")]
    InvalidBufferCount,
}

/// Scan parameters, as handed over by the external configuration loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    pub board_num: u32,
    /// Selected channels, scanned by the hardware as a contiguous
    /// `[first, last]` range.
    pub channels: Vec<u8>,
    /// Samples per second per channel.
    pub rate: f64,
    pub range: VoltageRange,
    pub input_mode: InputMode,
    /// Seconds of data the scan ring holds per channel.
    pub buffer_seconds: u32,
    /// Logical ring fills to accumulate before the scan completes.
    pub num_buffers: u32,
    pub output_path: PathBuf,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            board_num: 0,
            channels: vec![0, 1, 2, 3],
            rate: 1000.0,
            range: VoltageRange::Bip10Volts,
            input_mode: InputMode::Differential,
            buffer_seconds: 2,
            num_buffers: 5,
            output_path: PathBuf::from("output.csv"),
        }
    }
}

/// Scan geometry derived from a validated config and the board capability.
#[derive(Debug, Clone)]
pub struct ScanPlan {
    pub channels: Vec<u8>,
    pub low_chan: u8,
    pub high_chan: u8,
    pub rate: f64,
    pub range: VoltageRange,
    pub input_mode: InputMode,
    /// Ring points per channel, rounded up to the packet-size granularity.
    pub points_per_channel: usize,
    /// Total samples in the ring, all channels interleaved.
    pub ring_capacity: usize,
    /// Samples copied out of the ring per extraction.
    pub write_chunk_size: usize,
    /// Absolute sample count at which the scan completes.
    pub points_to_write: u64,
}

impl ScanPlan {
    pub fn new(config: &ScanConfig, ai: &AiCapability) -> Result<Self, ConfigError> {
        let channels = config.channels.clone();
        let (low_chan, high_chan) = match (channels.first(), channels.last()) {
            (Some(&low), Some(&high)) => (low, high),
            _ => {
                return Err(ConfigError::InvalidChannelSelection(
                    "no channels selected".to_string(),
                ));
            }
        };
        if channels.windows(2).any(|w| w[1] <= w[0] || w[1] - w[0] != 1) {
            return Err(ConfigError::InvalidChannelSelection(format!(
                "channels must be contiguous and ascending, got {channels:?}"
            )));
        }
        if high_chan >= ai.num_chans {
            return Err(ConfigError::InvalidChannelSelection(format!(
                "channel {} out of range for a board with {} channels",
                high_chan, ai.num_chans
            )));
        }
        if config.rate <= 0.0 {
            return Err(ConfigError::InvalidRate(config.rate));
        }
        if !ai.supported_ranges.contains(&config.range) {
            return Err(ConfigError::UnsupportedRange(config.range));
        }
        if config.num_buffers == 0 {
            return Err(ConfigError::InvalidBufferCount);
        }

        let mut points_per_channel = (config.rate * config.buffer_seconds as f64).ceil() as usize;
        points_per_channel = points_per_channel.max(MIN_POINTS_PER_CHANNEL);
        if ai.packet_size > 1 {
            let remainder = points_per_channel % ai.packet_size;
            if remainder != 0 {
                points_per_channel += ai.packet_size - remainder;
            }
        }

        let ring_capacity = points_per_channel * channels.len();
        let write_chunk_size = ring_capacity / CHUNKS_PER_RING;
        let points_to_write = ring_capacity as u64 * config.num_buffers as u64;

        Ok(Self {
            channels,
            low_chan,
            high_chan,
            rate: config.rate,
            range: config.range,
            input_mode: config.input_mode,
            points_per_channel,
            ring_capacity,
            write_chunk_size,
            points_to_write,
        })
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Column labels for the output header, in configured channel order.
    pub fn channel_labels(&self) -> Vec<String> {
        self.channels.iter().map(|c| format!("Channel {c}")).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capability(packet_size: usize) -> AiCapability {
        AiCapability {
            num_chans: 8,
            packet_size,
            supported_ranges: vec![VoltageRange::Bip10Volts, VoltageRange::Bip5Volts],
        }
    }

    fn config() -> ScanConfig {
        ScanConfig {
            channels: vec![0, 1],
            ..ScanConfig::default()
        }
    }

    #[test]
    fn plan_geometry_without_packet_rounding() {
        let plan = ScanPlan::new(&config(), &capability(1)).unwrap();
        assert_eq!(plan.points_per_channel, 2000);
        assert_eq!(plan.ring_capacity, 4000);
        assert_eq!(plan.write_chunk_size, 400);
        assert_eq!(plan.points_to_write, 20_000);
        assert_eq!((plan.low_chan, plan.high_chan), (0, 1));
    }

    #[test]
    fn points_per_channel_rounds_up_to_packet_size() {
        let plan = ScanPlan::new(&config(), &capability(32)).unwrap();
        // 2000 -> next multiple of 32
        assert_eq!(plan.points_per_channel, 2016);
        assert_eq!(plan.ring_capacity, 4032);
        assert_eq!(plan.write_chunk_size, 403);
    }

    #[test]
    fn points_per_channel_has_a_floor() {
        let mut cfg = config();
        cfg.rate = 1.0;
        cfg.buffer_seconds = 2;
        let plan = ScanPlan::new(&cfg, &capability(1)).unwrap();
        assert_eq!(plan.points_per_channel, 10);
    }

    #[test]
    fn empty_selection_is_rejected() {
        let mut cfg = config();
        cfg.channels.clear();
        assert!(matches!(
            ScanPlan::new(&cfg, &capability(1)),
            Err(ConfigError::InvalidChannelSelection(_))
        ));
    }

    #[test]
    fn non_contiguous_selection_is_rejected() {
        let mut cfg = config();
        cfg.channels = vec![0, 2];
        assert!(matches!(
            ScanPlan::new(&cfg, &capability(1)),
            Err(ConfigError::InvalidChannelSelection(_))
        ));
    }

    #[test]
    fn channel_past_board_capability_is_rejected() {
        let mut cfg = config();
        cfg.channels = vec![6, 7, 8];
        assert!(matches!(
            ScanPlan::new(&cfg, &capability(1)),
            Err(ConfigError::InvalidChannelSelection(_))
        ));
    }

    #[test]
    fn zero_rate_is_rejected() {
        let mut cfg = config();
        cfg.rate = 0.0;
        assert!(matches!(
            ScanPlan::new(&cfg, &capability(1)),
            Err(ConfigError::InvalidRate(_))
        ));
    }

    #[test]
    fn unsupported_range_is_rejected() {
        let mut cfg = config();
        cfg.range = VoltageRange::Bip1Volts;
        assert!(matches!(
            ScanPlan::new(&cfg, &capability(1)),
            Err(ConfigError::UnsupportedRange(_))
        ));
    }

    #[test]
    fn zero_buffers_is_rejected() {
        let mut cfg = config();
        cfg.num_buffers = 0;
        assert!(matches!(
            ScanPlan::new(&cfg, &capability(1)),
            Err(ConfigError::InvalidBufferCount)
        ));
    }

    #[test]
    fn config_round_trips_through_json() {
        let cfg = ScanConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ScanConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.channels, cfg.channels);
        assert_eq!(back.rate, cfg.rate);
        assert_eq!(back.output_path, cfg.output_path);
    }
}
