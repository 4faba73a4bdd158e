//! Pipeline integration tests for frameboost
//!
//! These exercise the engine through its public surface only: a mock
//! device monitor and frame sink stand in for the host platform, frames
//! go in through `ingest_frame`, and synthesized output comes back
//! through the sink.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use frameboost::cache::{compress, decompress, MotionVectorCache};
use frameboost::engine::{DeviceMonitor, Engine, EngineConfig, FrameSink};
use frameboost::gyro::GyroSample;
use frameboost::motion::{EstimationParams, MotionEstimator};
use frameboost::pool::FrameBufferPool;
use frameboost::quality::PerformanceTier;
use frameboost::Error;

// ============================================================================
// Mock collaborators
// ============================================================================

struct MockMonitor {
    tier: PerformanceTier,
    charging: bool,
}

impl DeviceMonitor for MockMonitor {
    fn performance_tier(&self) -> PerformanceTier {
        self.tier
    }
    fn is_charging(&self) -> bool {
        self.charging
    }
    fn refresh_rate(&self) -> f32 {
        120.0
    }
}

#[derive(Default)]
struct MockSink {
    interpolated: AtomicUsize,
    last_frame: Mutex<Vec<u8>>,
    last_dims: Mutex<(usize, usize)>,
    fps_samples: Mutex<Vec<f32>>,
}

impl FrameSink for MockSink {
    fn on_interpolated_frame(&self, frame: &[u8], width: usize, height: usize) {
        self.interpolated.fetch_add(1, Ordering::SeqCst);
        *self.last_frame.lock().unwrap() = frame.to_vec();
        *self.last_dims.lock().unwrap() = (width, height);
    }
    fn on_fps_sample(&self, fps: f32) {
        self.fps_samples.lock().unwrap().push(fps);
    }
}

fn make_engine(target_fps: f32) -> (Engine, Arc<MockSink>) {
    let sink = Arc::new(MockSink::default());
    let monitor = Arc::new(MockMonitor {
        tier: PerformanceTier::High,
        charging: false,
    });
    let engine = Engine::new(
        EngineConfig::new().with_target_fps(target_fps),
        monitor,
        Arc::clone(&sink) as Arc<dyn FrameSink>,
    )
    .unwrap();
    (engine, sink)
}

/// Textured RGBA frame whose content sits `shift` pixels to the right
fn shifted_frame(width: usize, height: usize, shift: usize) -> Vec<u8> {
    let mut data = vec![0u8; width * height * 4];
    for y in 0..height {
        for x in 0..width {
            let sx = x.saturating_sub(shift);
            let v = ((sx * 7 + y * 3) % 251) as u8;
            let idx = (y * width + x) * 4;
            data[idx] = v;
            data[idx + 1] = v;
            data[idx + 2] = v;
            data[idx + 3] = 255;
        }
    }
    data
}

// ============================================================================
// Engine lifecycle
// ============================================================================

#[test]
fn test_lifecycle_start_ingest_stop() {
    let (engine, sink) = make_engine(60.0);
    engine.start().unwrap();
    assert!(engine.is_running());

    for shift in 0..6 {
        engine
            .ingest_frame(&shifted_frame(64, 64, shift), 64, 64)
            .unwrap();
        thread::sleep(Duration::from_millis(30));
    }
    thread::sleep(Duration::from_millis(200));
    engine.stop();
    assert!(!engine.is_running());

    assert!(sink.interpolated.load(Ordering::SeqCst) >= 1);
}

#[test]
fn test_stop_without_start_is_harmless() {
    let (engine, _sink) = make_engine(60.0);
    engine.stop();
    engine.stop();
    assert!(!engine.is_running());
}

#[test]
fn test_single_frame_produces_no_output() {
    // One ingested frame has no partner to pair with.
    let (engine, sink) = make_engine(60.0);
    engine.start().unwrap();
    engine
        .ingest_frame(&shifted_frame(32, 32, 0), 32, 32)
        .unwrap();
    thread::sleep(Duration::from_millis(150));
    engine.stop();
    assert_eq!(sink.interpolated.load(Ordering::SeqCst), 0);
}

#[test]
fn test_gyro_samples_are_accepted_while_running() {
    let (engine, _sink) = make_engine(60.0);
    let sender = engine.gyro_sender();
    engine.start().unwrap();
    engine
        .ingest_frame(&shifted_frame(64, 64, 0), 64, 64)
        .unwrap();
    for _ in 0..100 {
        sender.push(GyroSample { x: 0.3, y: -0.2 });
    }
    engine
        .ingest_frame(&shifted_frame(64, 64, 2), 64, 64)
        .unwrap();
    thread::sleep(Duration::from_millis(150));
    engine.stop();
}

// ============================================================================
// End-to-end motion recovery
// ============================================================================

#[test]
fn test_uniform_translation_is_recovered() {
    let prev = shifted_frame(96, 96, 0);
    let curr = shifted_frame(96, 96, 4);
    let estimator = MotionEstimator::new();
    let params = EstimationParams {
        block_size: 8,
        search_range: 8,
        levels: 3,
    };
    let field = estimator.estimate(&prev, &curr, 96, 96, &params).unwrap();

    for by in 2..field.rows() - 2 {
        for bx in 2..field.cols() - 2 {
            let (dx, dy) = field.get(bx, by);
            assert!((dx - 4).abs() <= 1, "block ({bx},{by}) dx = {dx}");
            assert!(dy.abs() <= 1, "block ({bx},{by}) dy = {dy}");
        }
    }
}

#[test]
fn test_recovered_field_survives_a_cache_round_trip() {
    let prev = shifted_frame(64, 64, 0);
    let curr = shifted_frame(64, 64, 2);
    let estimator = MotionEstimator::new();
    let field = estimator
        .estimate(&prev, &curr, 64, 64, &EstimationParams::default())
        .unwrap();

    let restored = decompress(&compress(&field).unwrap()).unwrap();
    assert_eq!(restored, field);

    let mut cache = MotionVectorCache::default();
    cache.push(&field).unwrap();
    let latest = decompress(cache.latest().unwrap()).unwrap();
    assert_eq!(latest, field);
}

// ============================================================================
// Pool behaviour across the public surface
// ============================================================================

#[test]
fn test_pool_reuse_without_leak_report() {
    let pool = FrameBufferPool::new(4);
    let size = 64 * 64 * 4;
    {
        let buffer = pool.acquire(size).unwrap();
        assert!(buffer.capacity() >= size);
    }
    let again = pool.acquire(size).unwrap();
    assert!(again.capacity() >= size);
    drop(again);
    assert_eq!(pool.check_leaks(), 0);
}

// ============================================================================
// Error surface
// ============================================================================

#[test]
fn test_engine_errors_are_reported_not_panicked() {
    let (engine, _sink) = make_engine(60.0);
    let err = engine
        .ingest_frame(&shifted_frame(16, 16, 0), 16, 16)
        .unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    engine.start().unwrap();
    let err = engine.ingest_frame(&[0u8; 8], 64, 64).unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
    engine.stop();
}
