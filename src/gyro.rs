//! Gyroscope-assisted motion compensation
//!
//! Two independent 1-D scalar Kalman filters smooth noisy angular-rate
//! samples into a per-axis pixel offset applied at blend time. Samples
//! arrive through a bounded channel fed by the sensor-sampling
//! collaborator; the engine drains pending samples and reads the latest
//! offset when it synthesizes a frame, so a sensor burst never interrupts
//! a computation in flight.

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};

/// Fixed measurement noise of the scalar filter
pub const MEASUREMENT_NOISE: f32 = 0.1;

/// Default process noise (calm motion)
pub const PROCESS_NOISE_LOW: f32 = 0.01;

/// Elevated process noise used when motion energy is high, so the filter
/// trusts fresh measurements more
pub const PROCESS_NOISE_HIGH: f32 = 0.05;

/// Motion-energy threshold above which process noise is raised
pub const ENERGY_THRESHOLD: f32 = 1.0;

/// Gain applied to the filtered estimate to produce a pixel offset
pub const DEFAULT_OFFSET_GAIN: f32 = 0.15;

/// One-dimensional scalar Kalman filter
#[derive(Debug, Clone)]
pub struct ScalarKalman {
    estimate: f32,
    error_covariance: f32,
    process_noise: f32,
}

impl ScalarKalman {
    pub fn new() -> Self {
        ScalarKalman {
            estimate: 0.0,
            error_covariance: 1.0,
            process_noise: PROCESS_NOISE_LOW,
        }
    }

    /// Fold one measurement into the state and return the new estimate
    pub fn update(&mut self, measurement: f32) -> f32 {
        let gain = self.error_covariance / (self.error_covariance + MEASUREMENT_NOISE);
        self.estimate += gain * (measurement - self.estimate);
        self.error_covariance = (1.0 - gain) * self.error_covariance + self.process_noise;
        self.estimate
    }

    pub fn estimate(&self) -> f32 {
        self.estimate
    }

    pub fn error_covariance(&self) -> f32 {
        self.error_covariance
    }

    pub fn set_process_noise(&mut self, noise: f32) {
        self.process_noise = noise;
    }
}

impl Default for ScalarKalman {
    fn default() -> Self {
        Self::new()
    }
}

/// One two-axis angular-rate reading
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GyroSample {
    pub x: f32,
    pub y: f32,
}

/// Filtered per-axis pixel offset applied by the synthesizer
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GyroOffset {
    pub x: f32,
    pub y: f32,
}

/// Producer handle for gyro samples
///
/// Pushing to a full channel drops the oldest pending sample; offsets are
/// smoothing data, never safety-critical.
#[derive(Clone)]
pub struct GyroSender {
    tx: Sender<GyroSample>,
    rx: Receiver<GyroSample>,
}

impl GyroSender {
    pub fn push(&self, sample: GyroSample) {
        if let Err(TrySendError::Full(sample)) = self.tx.try_send(sample) {
            let _ = self.rx.try_recv();
            let _ = self.tx.try_send(sample);
        }
    }
}

/// Consumer side: drains samples through the two filters and publishes
/// the current motion-compensation offset.
pub struct GyroCompensator {
    rx: Receiver<GyroSample>,
    tx: Sender<GyroSample>,
    filter_x: ScalarKalman,
    filter_y: ScalarKalman,
    gain: f32,
    offset: GyroOffset,
}

impl GyroCompensator {
    /// Create a compensator with a bounded sample channel
    pub fn new(channel_capacity: usize, gain: f32) -> Self {
        let (tx, rx) = bounded(channel_capacity);
        GyroCompensator {
            rx,
            tx,
            filter_x: ScalarKalman::new(),
            filter_y: ScalarKalman::new(),
            gain,
            offset: GyroOffset::default(),
        }
    }

    /// Producer handle for the sensor-sampling collaborator
    pub fn sender(&self) -> GyroSender {
        GyroSender {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }

    /// Drain pending samples and return the up-to-date offset
    pub fn current_offset(&mut self) -> GyroOffset {
        while let Ok(sample) = self.rx.try_recv() {
            self.apply(sample);
        }
        self.offset
    }

    fn apply(&mut self, sample: GyroSample) {
        let energy = (sample.x * sample.x + sample.y * sample.y).sqrt();
        let noise = if energy > ENERGY_THRESHOLD {
            PROCESS_NOISE_HIGH
        } else {
            PROCESS_NOISE_LOW
        };
        self.filter_x.set_process_noise(noise);
        self.filter_y.set_process_noise(noise);
        self.filter_x.update(sample.x);
        self.filter_y.update(sample.y);
        self.offset = GyroOffset {
            x: self.filter_x.estimate() * self.gain,
            y: self.filter_y.estimate() * self.gain,
        };
    }
}
