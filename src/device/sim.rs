use std::f64::consts::TAU;
use std::time::Instant;

use rand::random_range;
use tracing::info;

use crate::device::{
    AiCapability, DaqDevice, DaqError, DeviceInfo, InputMode, ScanRequest, ScanStatus, VoltageRange,
};

/// Full-scale amplitude of the simulated waveform, volts.
const SIM_AMPLITUDE: f64 = 5.0;
/// Base frequency of the simulated waveform, Hz.
const SIM_FREQUENCY: f64 = 5.0;

/// Enumerate the simulated inventory: a single board at number 0.
pub fn enumerate() -> Vec<DeviceInfo> {
    vec![DeviceInfo {
        board_num: 0,
        product_name: "USB-2416 (simulated)".to_string(),
        product_id: 209,
    }]
}

/// Open the simulated board with the given board number.
pub fn open(board_num: u32) -> Result<SimDevice, DaqError> {
    let info = enumerate()
        .into_iter()
        .find(|d| d.board_num == board_num)
        .ok_or(DaqError::NoDevices)?;

    info!("opened {} as board {}", info.product_name, info.board_num);
    Ok(SimDevice {
        info,
        scan: None,
        released: false,
    })
}

/// Simulated DAQ board. The "hardware" counter advances with wall-clock time;
/// samples are materialized into the ring lazily on each status query, so the
/// producer can run arbitrarily far ahead of the consumer, including past a
/// full ring (a real overrun).
#[derive(Debug)]
pub struct SimDevice {
    info: DeviceInfo,
    scan: Option<SimScan>,
    released: bool,
}

#[derive(Debug)]
struct SimScan {
    ring: Vec<f64>,
    channel_count: usize,
    /// Samples per second per channel.
    rate: f64,
    started: Instant,
    /// Absolute samples materialized into the ring so far.
    written: u64,
    running: bool,
}

impl SimScan {
    /// Scaled sample for absolute position `n`: a per-channel phase-shifted
    /// sine with a little noise on top.
    fn sample(&self, n: u64) -> f64 {
        let channel = (n as usize % self.channel_count) as f64;
        let cycle = n / self.channel_count as u64;
        let t = cycle as f64 / self.rate;
        let phase = channel * TAU / 8.0;
        SIM_AMPLITUDE * (TAU * SIM_FREQUENCY * t + phase).sin() + random_range(-0.05..=0.05)
    }

    /// Advance the write counter to match elapsed wall-clock time.
    fn catch_up(&mut self) {
        let elapsed = self.started.elapsed().as_secs_f64();
        let target = (elapsed * self.rate * self.channel_count as f64) as u64;
        let capacity = self.ring.len() as u64;
        while self.written < target {
            let value = self.sample(self.written);
            let index = (self.written % capacity) as usize;
            self.ring[index] = value;
            self.written += 1;
        }
    }
}

impl SimDevice {
    fn check_released(&self) -> Result<(), DaqError> {
        if self.released {
            return Err(DaqError::Fault("board already released".to_string()));
        }
        Ok(())
    }
}

impl DaqDevice for SimDevice {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn ai_capability(&self) -> Option<AiCapability> {
        Some(AiCapability {
            num_chans: 16,
            packet_size: 32,
            supported_ranges: vec![
                VoltageRange::Bip10Volts,
                VoltageRange::Bip5Volts,
                VoltageRange::Bip2Volts,
                VoltageRange::Bip1Volts,
            ],
        })
    }

    fn configure_channels(&mut self, channels: &[u8], mode: InputMode) -> Result<(), DaqError> {
        self.check_released()?;
        for channel in channels {
            info!("configuring channel {} as voltage input, {:?}", channel, mode);
        }
        Ok(())
    }

    fn start_background_scan(&mut self, request: &ScanRequest) -> Result<(), DaqError> {
        self.check_released()?;
        if self.scan.as_ref().is_some_and(|s| s.running) {
            return Err(DaqError::Busy("a background scan is already running".to_string()));
        }

        let channel_count = (request.high_chan - request.low_chan + 1) as usize;
        info!(
            "starting background scan: channels {}..={} at {} S/s, ring of {} samples",
            request.low_chan, request.high_chan, request.rate, request.ring_capacity
        );
        self.scan = Some(SimScan {
            ring: vec![0.0; request.ring_capacity],
            channel_count,
            rate: request.rate,
            started: Instant::now(),
            written: 0,
            running: true,
        });
        Ok(())
    }

    fn status(&mut self) -> Result<(ScanStatus, u64, usize), DaqError> {
        self.check_released()?;
        match self.scan.as_mut() {
            None => Ok((ScanStatus::Idle, 0, 0)),
            Some(scan) => {
                if scan.running {
                    scan.catch_up();
                }
                let index = (scan.written % scan.ring.len() as u64) as usize;
                let status = if scan.running {
                    ScanStatus::Running
                } else {
                    ScanStatus::Idle
                };
                Ok((status, scan.written, index))
            }
        }
    }

    fn read_scaled(&self, start: usize, out: &mut [f64]) -> Result<(), DaqError> {
        self.check_released()?;
        let scan = self
            .scan
            .as_ref()
            .ok_or_else(|| DaqError::Fault("no scan buffer allocated".to_string()))?;
        let end = start + out.len();
        if end > scan.ring.len() {
            return Err(DaqError::Fault(format!(
                "read of {}..{} exceeds ring of {} samples",
                start,
                end,
                scan.ring.len()
            )));
        }
        out.copy_from_slice(&scan.ring[start..end]);
        Ok(())
    }

    fn stop_background(&mut self) -> Result<(), DaqError> {
        self.check_released()?;
        if let Some(scan) = self.scan.as_mut() {
            scan.running = false;
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), DaqError> {
        self.check_released()?;
        self.released = true;
        self.scan = None;
        info!("released board {}", self.info.board_num);
        Ok(())
    }
}
