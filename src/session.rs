use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::{ConfigError, ScanConfig, ScanPlan};
use crate::device::{DaqDevice, DaqError, ScanRequest, ScanStatus};
use crate::ring::RingRead;

#[derive(Error, Debug)]
pub enum AcquireError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Device(#[from] DaqError),
}

/// Session-level view of the scan lifecycle. Transitions only ever move
/// Idle -> Running -> {Overrun | Stopped}; the latter two are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionStatus {
    Idle,
    Running,
    Overrun,
    Stopped,
}

/// Owns the opened board and its scan ring for the duration of one scan.
/// The board is released exactly once, on `stop`, no matter which way the
/// session ends; `Drop` is the backstop for early-error paths.
#[derive(Debug)]
pub struct AcquisitionSession {
    device: Box<dyn DaqDevice>,
    plan: ScanPlan,
    overrun: bool,
    stopped: bool,
    last_count: u64,
    last_index: usize,
}

impl AcquisitionSession {
    /// Validate the board against the config, derive the scan geometry, and
    /// apply per-channel input settings. No scan is armed yet. On any
    /// validation failure the board is released before the error propagates.
    pub fn open(mut device: Box<dyn DaqDevice>, config: &ScanConfig) -> Result<Self, AcquireError> {
        match Self::validate(device.as_mut(), config) {
            Ok(plan) => {
                info!(
                    board = device.info().board_num,
                    channels = ?plan.channels,
                    rate = plan.rate,
                    ring_capacity = plan.ring_capacity,
                    "acquisition session opened"
                );
                Ok(Self {
                    device,
                    plan,
                    overrun: false,
                    stopped: false,
                    last_count: 0,
                    last_index: 0,
                })
            }
            Err(err) => {
                if let Err(release_err) = device.release() {
                    warn!("failed to release board after rejected config: {release_err}");
                }
                Err(err)
            }
        }
    }

    fn validate(device: &mut dyn DaqDevice, config: &ScanConfig) -> Result<ScanPlan, AcquireError> {
        let ai = device.ai_capability().ok_or_else(|| {
            ConfigError::UnsupportedDevice(device.info().product_name.clone())
        })?;
        let plan = ScanPlan::new(config, &ai)?;
        device.configure_channels(&plan.channels, plan.input_mode)?;
        Ok(plan)
    }

    pub fn plan(&self) -> &ScanPlan {
        &self.plan
    }

    /// Arm the continuous background scan. A start failure releases the
    /// board before propagating.
    pub fn start(&mut self) -> Result<(), AcquireError> {
        let request = ScanRequest {
            low_chan: self.plan.low_chan,
            high_chan: self.plan.high_chan,
            ring_capacity: self.plan.ring_capacity,
            rate: self.plan.rate,
            range: self.plan.range,
        };
        if let Err(err) = self.device.start_background_scan(&request) {
            self.stop();
            return Err(err.into());
        }
        Ok(())
    }

    /// Non-blocking status and counter query.
    pub fn poll(&mut self) -> Result<(SessionStatus, u64, usize), DaqError> {
        if self.overrun {
            return Ok((SessionStatus::Overrun, self.last_count, self.last_index));
        }
        if self.stopped {
            return Ok((SessionStatus::Stopped, self.last_count, self.last_index));
        }
        let (raw, count, index) = self.device.status()?;
        self.last_count = count;
        self.last_index = index;
        let status = match raw {
            ScanStatus::Running => SessionStatus::Running,
            ScanStatus::Idle => SessionStatus::Idle,
        };
        Ok((status, count, index))
    }

    /// Record that the consumer detected an overrun. Terminal for this
    /// session; `stop` still performs the release.
    pub fn mark_overrun(&mut self) {
        self.overrun = true;
    }

    /// Stop the background scan and release the board. Idempotent and safe
    /// from any state, including mid-failure teardown.
    pub fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;
        if let Err(err) = self.device.stop_background() {
            warn!("failed to stop background scan: {err}");
        }
        if let Err(err) = self.device.release() {
            warn!("failed to release board: {err}");
        }
        info!(samples = self.last_count, "acquisition session stopped");
    }
}

impl RingRead for AcquisitionSession {
    fn capacity(&self) -> usize {
        self.plan.ring_capacity
    }

    fn read_scaled(&self, start: usize, out: &mut [f64]) -> Result<(), DaqError> {
        self.device.read_scaled(start, out)
    }
}

impl Drop for AcquisitionSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::device::{AiCapability, DeviceInfo, InputMode, VoltageRange};

    #[derive(Debug)]
    struct CountingDevice {
        info: DeviceInfo,
        has_analog_input: bool,
        start_fails: bool,
        stops: Arc<AtomicUsize>,
        releases: Arc<AtomicUsize>,
    }

    impl CountingDevice {
        fn new(has_analog_input: bool, start_fails: bool) -> (Self, Arc<AtomicUsize>, Arc<AtomicUsize>) {
            let stops = Arc::new(AtomicUsize::new(0));
            let releases = Arc::new(AtomicUsize::new(0));
            let device = Self {
                info: DeviceInfo {
                    board_num: 0,
                    product_name: "counting".to_string(),
                    product_id: 0,
                },
                has_analog_input,
                start_fails,
                stops: stops.clone(),
                releases: releases.clone(),
            };
            (device, stops, releases)
        }
    }

    impl DaqDevice for CountingDevice {
        fn info(&self) -> &DeviceInfo {
            &self.info
        }

        fn ai_capability(&self) -> Option<AiCapability> {
            self.has_analog_input.then(|| AiCapability {
                num_chans: 8,
                packet_size: 1,
                supported_ranges: vec![VoltageRange::Bip10Volts],
            })
        }

        fn configure_channels(&mut self, _: &[u8], _: InputMode) -> Result<(), DaqError> {
            Ok(())
        }

        fn start_background_scan(&mut self, _: &ScanRequest) -> Result<(), DaqError> {
            if self.start_fails {
                return Err(DaqError::Busy("already scanning".to_string()));
            }
            Ok(())
        }

        fn status(&mut self) -> Result<(ScanStatus, u64, usize), DaqError> {
            Ok((ScanStatus::Running, 0, 0))
        }

        fn read_scaled(&self, _: usize, _: &mut [f64]) -> Result<(), DaqError> {
            Ok(())
        }

        fn stop_background(&mut self) -> Result<(), DaqError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn release(&mut self) -> Result<(), DaqError> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn config() -> ScanConfig {
        ScanConfig {
            channels: vec![0, 1],
            ..ScanConfig::default()
        }
    }

    #[test]
    fn stop_is_idempotent_and_releases_once() {
        let (device, stops, releases) = CountingDevice::new(true, false);
        let mut session = AcquisitionSession::open(Box::new(device), &config()).unwrap();
        session.start().unwrap();
        session.stop();
        session.stop();
        drop(session);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn drop_releases_the_board() {
        let (device, _, releases) = CountingDevice::new(true, false);
        let session = AcquisitionSession::open(Box::new(device), &config()).unwrap();
        drop(session);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn device_without_analog_input_is_rejected_and_released() {
        let (device, _, releases) = CountingDevice::new(false, false);
        let result = AcquisitionSession::open(Box::new(device), &config());
        assert!(matches!(
            result,
            Err(AcquireError::Config(ConfigError::UnsupportedDevice(_)))
        ));
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_start_releases_the_board_before_propagating() {
        let (device, _, releases) = CountingDevice::new(true, true);
        let mut session = AcquisitionSession::open(Box::new(device), &config()).unwrap();
        assert!(session.start().is_err());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
        drop(session);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn poll_reports_terminal_states_without_touching_the_board() {
        let (device, _, _) = CountingDevice::new(true, false);
        let mut session = AcquisitionSession::open(Box::new(device), &config()).unwrap();
        session.mark_overrun();
        let (status, _, _) = session.poll().unwrap();
        assert_eq!(status, SessionStatus::Overrun);
        session.stop();
        // Overrun outranks Stopped: it is what ended the session.
        let (status, _, _) = session.poll().unwrap();
        assert_eq!(status, SessionStatus::Overrun);
    }
}
