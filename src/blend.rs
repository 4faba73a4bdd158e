//! Motion-compensated frame blending
//!
//! Produces an intermediate frame between two RGBA frames by warping
//! samples from the previous frame along the estimated motion field and
//! mixing them with the current frame at the output location. The
//! per-pixel mix weight follows the local motion magnitude, so static
//! regions pass the previous frame through unchanged while strongly
//! moving regions lean toward the current frame.
//!
//! A cheap sampled frame difference gates the whole pipeline: nearly
//! identical frames skip estimation and blending entirely.

use crate::error::{Error, Result};
use crate::gyro::GyroOffset;
use crate::motion::MotionField;

/// Sampled difference below which interpolation is skipped
pub const SKIP_THRESHOLD: f32 = 0.01;

/// Byte stride between samples: every 16th RGBA pixel
const SAMPLE_STRIDE: usize = 64;

/// Normalized sampled difference between two RGBA frames
///
/// Reads every 16th pixel as a packed little-endian `i32` and accumulates
/// absolute deltas, normalized to `[0, 1]`. Coarse by construction; only
/// meaningful as a skip gate, not as a similarity metric.
pub fn frame_difference(prev: &[u8], curr: &[u8]) -> Result<f32> {
    if prev.len() != curr.len() {
        return Err(Error::invalid_input(format!(
            "frame length mismatch: {} vs {} bytes",
            prev.len(),
            curr.len()
        )));
    }
    let mut total = 0i64;
    let mut samples = 0u64;
    let mut idx = 0usize;
    while idx + 4 <= prev.len() {
        let a = i32::from_le_bytes([prev[idx], prev[idx + 1], prev[idx + 2], prev[idx + 3]]);
        let b = i32::from_le_bytes([curr[idx], curr[idx + 1], curr[idx + 2], curr[idx + 3]]);
        total += (a as i64 - b as i64).abs();
        samples += 1;
        idx += SAMPLE_STRIDE;
    }
    if samples == 0 {
        return Ok(0.0);
    }
    let normalized = total as f64 / (samples as f64 * 255.0);
    Ok(normalized.min(1.0) as f32)
}

/// Whether the sampled difference is small enough to skip interpolation
pub fn should_skip(difference: f32) -> bool {
    difference < SKIP_THRESHOLD
}

/// Write a motion-compensated intermediate frame into `out`
///
/// `temporal_factor` is the position of the output between the previous
/// frame (0.0) and the current frame (1.0). The gyro offset shifts the
/// warp source uniformly to counter device rotation between captures.
#[allow(clippy::too_many_arguments)]
pub fn blend_frames(
    prev: &[u8],
    curr: &[u8],
    out: &mut [u8],
    width: usize,
    height: usize,
    field: &MotionField,
    temporal_factor: f32,
    gyro: GyroOffset,
) -> Result<()> {
    let frame_len = width * height * 4;
    if prev.len() < frame_len || curr.len() < frame_len || out.len() < frame_len {
        return Err(Error::invalid_input(format!(
            "buffers shorter than {}x{} RGBA frame",
            width, height
        )));
    }
    if field.num_blocks() == 0 {
        return Err(Error::invalid_input("empty motion field"));
    }

    let max_x = width as f32 - 1.0;
    let max_y = height as f32 - 1.0;
    let magnitude_scale = (2 * field.block_size()) as f32;

    for y in 0..height {
        for x in 0..width {
            let (dx, dy) = field.vector_for_pixel(x, y);
            let weight = ((dx.abs() + dy.abs()) as f32 / magnitude_scale).min(1.0);

            let sx = (x as f32 + dx as f32 * temporal_factor + gyro.x).clamp(0.0, max_x) as usize;
            let sy = (y as f32 + dy as f32 * temporal_factor + gyro.y).clamp(0.0, max_y) as usize;

            let dst = (y * width + x) * 4;
            let src = (sy * width + sx) * 4;
            for c in 0..4 {
                let p = prev[src + c] as f32;
                let w = curr[dst + c] as f32;
                out[dst + c] = (p * (1.0 - weight) + w * weight) as u8;
            }
        }
    }
    Ok(())
}
