//! Adaptive quality control
//!
//! Observes the achieved frame rate and power state once per scheduling
//! tick and retunes the pipeline: quality level, effective target frame
//! rate, resolution scale, and the per-frame-pair block matching
//! parameters. State is written only from the driver tick and read from
//! worker threads, so it lives behind a `parking_lot` RwLock with readers
//! tolerating slightly stale values.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

/// Highest quality tier
pub const QUALITY_FULL: u32 = 4;
/// Reduced tier under mild frame-rate pressure
pub const QUALITY_REDUCED: u32 = 1;
/// Lowest tier under heavy pressure
pub const QUALITY_MINIMUM: u32 = 0;

/// Upper bound on the rescaled target frame rate
pub const MAX_TARGET_FPS: f32 = 120.0;

/// Lower bound on the block side after retuning
pub const MIN_BLOCK_SIZE: usize = 4;

/// Device performance class reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PerformanceTier {
    High,
    Mid,
    Low,
}

/// Tuning parameters shared across the pipeline
///
/// Written by [`QualityController::update`] on the driver tick; read
/// anywhere.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityState {
    pub block_size: usize,
    pub search_range: i32,
    pub resolution_scale: f32,
    pub target_fps: f32,
    pub quality_level: u32,
}

impl QualityState {
    pub fn new(target_fps: f32) -> Self {
        QualityState {
            block_size: 8,
            search_range: 16,
            resolution_scale: 1.0,
            target_fps,
            quality_level: QUALITY_FULL,
        }
    }
}

/// Result of one controller tick
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityUpdate {
    pub quality_level: u32,
    pub fps_multiplier: f32,
    pub resolution_scale: f32,
    /// Whether the resolution scale changed this tick; the driver must
    /// reallocate the interpolated buffer and drop cached motion fields.
    pub resolution_changed: bool,
}

/// Frame-rate-driven parameter tuner
#[derive(Debug, Clone)]
pub struct QualityController {
    state: Arc<RwLock<QualityState>>,
}

impl QualityController {
    pub fn new(target_fps: f32) -> Self {
        QualityController {
            state: Arc::new(RwLock::new(QualityState::new(target_fps))),
        }
    }

    /// Snapshot of the current tuning parameters
    pub fn state(&self) -> QualityState {
        self.state.read().clone()
    }

    /// Apply a device performance class as the starting tune
    pub fn tune_for_tier(&self, tier: PerformanceTier) {
        let (block_size, search_range) = match tier {
            PerformanceTier::High => (8, 16),
            PerformanceTier::Mid => (12, 12),
            PerformanceTier::Low => (16, 8),
        };
        let mut state = self.state.write();
        state.block_size = block_size;
        state.search_range = search_range;
        debug!(?tier, block_size, search_range, "tuned for device tier");
    }

    /// Re-evaluate quality from the measured frame rate and power state
    ///
    /// Charging scales the fps multiplier by 0.7: throttling harder when
    /// plugged in trades rate for thermal headroom.
    pub fn update(&self, measured_fps: f32, charging: bool) -> QualityUpdate {
        let mut state = self.state.write();
        let target = state.target_fps;

        let quality_level = if measured_fps < 0.8 * target {
            QUALITY_MINIMUM
        } else if measured_fps < 0.9 * target {
            QUALITY_REDUCED
        } else {
            QUALITY_FULL
        };

        let mut fps_multiplier = match quality_level {
            QUALITY_FULL => 2.0,
            QUALITY_REDUCED => 1.25,
            _ => 1.0,
        };
        if charging {
            fps_multiplier *= 0.7;
        }

        let raw_scale: f32 = if fps_multiplier > 1.5 { 1.0 } else { 0.7 };
        let resolution_scale = raw_scale.clamp(0.5, 1.0);
        let resolution_changed = (resolution_scale - state.resolution_scale).abs() > f32::EPSILON;

        state.quality_level = quality_level;
        state.resolution_scale = resolution_scale;
        state.target_fps = (target * fps_multiplier).min(MAX_TARGET_FPS);

        debug!(
            measured_fps,
            charging,
            quality_level,
            fps_multiplier,
            resolution_scale,
            target_fps = state.target_fps,
            "quality update"
        );

        QualityUpdate {
            quality_level,
            fps_multiplier,
            resolution_scale,
            resolution_changed,
        }
    }

    /// Clamp the target frame rate to the device refresh rate
    pub fn cap_target_fps(&self, refresh_rate: f32) {
        let mut state = self.state.write();
        if state.target_fps > refresh_rate {
            state.target_fps = refresh_rate;
        }
    }

    /// Retune block matching from the sampled inter-frame difference
    ///
    /// Larger differences get coarser blocks; search range mirrors the
    /// block side.
    pub fn retune_block_size(&self, frame_difference: f32) -> usize {
        let coarse: usize = if frame_difference > 0.3 {
            16
        } else if frame_difference > 0.15 {
            12
        } else {
            8
        };
        let block_size = coarse.max(MIN_BLOCK_SIZE);

        let mut state = self.state.write();
        state.block_size = block_size;
        state.search_range = block_size as i32;
        block_size
    }
}
