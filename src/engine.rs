//! Interpolation driver
//!
//! The engine owns the frame cadence and drives the pipeline: ingest
//! captured frames, pair previous/current, estimate motion on the worker
//! pool, blend with the gyro offset, and hand synthesized frames to the
//! presentation sink. Lifecycle is `Idle -> Running -> Stopped` with
//! idempotent start and stop; a stopped engine does not restart.
//!
//! The frame pair swap happens under one lock so no estimation job ever
//! observes a half-updated pair, and render submission for a pair is
//! posted from inside the estimation job's completion, ordering blend
//! before present. Quality parameters are read by workers without
//! holding any driver lock; slightly stale values are fine.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::blend;
use crate::cache::MotionVectorCache;
use crate::error::{Error, Result};
use crate::gyro::{GyroCompensator, GyroSender, DEFAULT_OFFSET_GAIN};
use crate::motion::{EstimationParams, MotionEstimator, DEFAULT_PYRAMID_LEVELS};
use crate::pool::FrameBufferPool;
use crate::quality::{PerformanceTier, QualityController};
use crate::scheduler::{
    JobScheduler, PRIORITY_ESTIMATION, PRIORITY_ESTIMATION_BOOST, PRIORITY_RENDER,
};

/// Cadence ticks between estimation-priority boosts
const BOOST_PERIOD: u64 = 5;

/// FPS sampling window
const FPS_WINDOW: Duration = Duration::from_millis(500);

const STATE_IDLE: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPED: u8 = 2;

/// Device-state queries the engine consults
pub trait DeviceMonitor: Send + Sync {
    fn performance_tier(&self) -> PerformanceTier;
    fn is_charging(&self) -> bool;
    /// Display refresh rate in Hz; upper bound on the target frame rate
    fn refresh_rate(&self) -> f32;
}

/// Presentation-side callbacks
pub trait FrameSink: Send + Sync {
    /// One call per synthesized frame
    fn on_interpolated_frame(&self, frame: &[u8], width: usize, height: usize);
    /// Periodic combined capture+synthesis rate report
    fn on_fps_sample(&self, fps: f32);
}

/// Engine construction parameters
#[derive(Debug, Clone)]
pub struct EngineConfig {
    target_fps: f32,
    pool_max_idle: usize,
    queue_capacity: usize,
    gyro_channel_capacity: usize,
    gyro_gain: f32,
}

impl EngineConfig {
    pub fn new() -> Self {
        EngineConfig {
            target_fps: 60.0,
            pool_max_idle: 8,
            queue_capacity: 64,
            gyro_channel_capacity: 32,
            gyro_gain: DEFAULT_OFFSET_GAIN,
        }
    }

    pub fn with_target_fps(mut self, fps: f32) -> Self {
        self.target_fps = fps;
        self
    }

    pub fn with_pool_max_idle(mut self, max_idle: usize) -> Self {
        self.pool_max_idle = max_idle;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_gyro_channel_capacity(mut self, capacity: usize) -> Self {
        self.gyro_channel_capacity = capacity;
        self
    }

    pub fn with_gyro_gain(mut self, gain: f32) -> Self {
        self.gyro_gain = gain;
        self
    }

    pub fn target_fps(&self) -> f32 {
        self.target_fps
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Combined capture + synthesis rate over a fixed window
struct FpsMeter {
    window_start: Instant,
    captured: u32,
    interpolated: u32,
    last_fps: f32,
}

impl FpsMeter {
    fn new(initial_fps: f32) -> Self {
        FpsMeter {
            window_start: Instant::now(),
            captured: 0,
            interpolated: 0,
            last_fps: initial_fps,
        }
    }

    fn record_captured(&mut self) {
        self.captured += 1;
    }

    fn record_interpolated(&mut self) {
        self.interpolated += 1;
    }

    fn last_fps(&self) -> f32 {
        self.last_fps
    }

    /// Close the window if it has elapsed and return the combined rate
    fn sample(&mut self) -> Option<f32> {
        let elapsed = self.window_start.elapsed();
        if elapsed < FPS_WINDOW {
            return None;
        }
        let secs = elapsed.as_secs_f32();
        let fps = (self.captured + self.interpolated) as f32 / secs;
        self.captured = 0;
        self.interpolated = 0;
        self.window_start = Instant::now();
        self.last_fps = fps;
        Some(fps)
    }
}

/// Previous/current frame pair plus synthesis dimensions
///
/// Swapped under a single lock so estimation jobs always see a coherent
/// pair. Effective dimensions track the resolution scale; base
/// dimensions are as captured.
struct FrameState {
    previous: Option<crate::pool::FrameBuffer>,
    current: Option<crate::pool::FrameBuffer>,
    base_width: usize,
    base_height: usize,
    effective_width: usize,
    effective_height: usize,
}

impl FrameState {
    fn empty() -> Self {
        FrameState {
            previous: None,
            current: None,
            base_width: 0,
            base_height: 0,
            effective_width: 0,
            effective_height: 0,
        }
    }

    fn clear(&mut self) {
        self.previous = None;
        self.current = None;
    }
}

struct EngineInner {
    config: EngineConfig,
    state: AtomicU8,
    pool: FrameBufferPool,
    scheduler: JobScheduler,
    estimator: MotionEstimator,
    quality: QualityController,
    gyro: Mutex<GyroCompensator>,
    cache: Mutex<MotionVectorCache>,
    frames: Mutex<FrameState>,
    fps: Mutex<FpsMeter>,
    monitor: Arc<dyn DeviceMonitor>,
    sink: Arc<dyn FrameSink>,
}

/// Frame-interpolation engine
pub struct Engine {
    inner: Arc<EngineInner>,
    cadence: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        monitor: Arc<dyn DeviceMonitor>,
        sink: Arc<dyn FrameSink>,
    ) -> Result<Self> {
        let inner = EngineInner {
            state: AtomicU8::new(STATE_IDLE),
            pool: FrameBufferPool::new(config.pool_max_idle),
            scheduler: JobScheduler::new(config.queue_capacity)?,
            estimator: MotionEstimator::new(),
            quality: QualityController::new(config.target_fps),
            gyro: Mutex::new(GyroCompensator::new(
                config.gyro_channel_capacity,
                config.gyro_gain,
            )),
            cache: Mutex::new(MotionVectorCache::default()),
            frames: Mutex::new(FrameState::empty()),
            fps: Mutex::new(FpsMeter::new(config.target_fps)),
            monitor,
            sink,
            config,
        };
        Ok(Engine {
            inner: Arc::new(inner),
            cadence: Mutex::new(None),
        })
    }

    /// Handle for the sensor-sampling collaborator
    pub fn gyro_sender(&self) -> GyroSender {
        self.inner.gyro.lock().sender()
    }

    /// Begin interpolating; a no-op when already running
    pub fn start(&self) -> Result<()> {
        match self.inner.state.compare_exchange(
            STATE_IDLE,
            STATE_RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(STATE_RUNNING) => return Ok(()),
            Err(_) => return Err(Error::invalid_state("engine already stopped")),
        }

        let tier = self.inner.monitor.performance_tier();
        self.inner.quality.tune_for_tier(tier);
        self.inner
            .quality
            .cap_target_fps(self.inner.monitor.refresh_rate());

        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("fb-cadence".into())
            .spawn(move || cadence_loop(inner))?;
        *self.cadence.lock() = Some(handle);

        info!(target_fps = self.inner.config.target_fps, "engine started");
        Ok(())
    }

    /// Push one captured RGBA frame
    ///
    /// When the resolution scale is below 1.0 the frame is downsampled
    /// into the pooled buffer on ingest, so every later stage works at
    /// the effective resolution.
    pub fn ingest_frame(&self, pixels: &[u8], width: usize, height: usize) -> Result<()> {
        if self.inner.state.load(Ordering::Acquire) != STATE_RUNNING {
            return Err(Error::invalid_state("engine is not running"));
        }
        if pixels.len() < width * height * 4 || width == 0 || height == 0 {
            return Err(Error::invalid_input(format!(
                "captured frame too short for {}x{} RGBA",
                width, height
            )));
        }

        let scale = self.inner.quality.state().resolution_scale;
        let (eff_w, eff_h) = if scale < 1.0 {
            (
                ((width as f32 * scale) as usize).max(1),
                ((height as f32 * scale) as usize).max(1),
            )
        } else {
            (width, height)
        };

        let mut buffer = match self.inner.pool.acquire(eff_w * eff_h * 4) {
            Ok(buffer) => buffer,
            Err(err) => {
                if err.is_fatal() {
                    error!(%err, "allocation failure on ingest, stopping");
                    fail_stop(&self.inner);
                }
                return Err(err);
            }
        };
        if (eff_w, eff_h) == (width, height) {
            buffer.copy_from_slice(pixels)?;
        } else {
            downsample_nearest(pixels, width, height, buffer.data_mut(), eff_w, eff_h);
        }

        let mut frames = self.inner.frames.lock();
        if (frames.effective_width, frames.effective_height) != (eff_w, eff_h) {
            // Resolution transition: the retained partner frame has the
            // old dimensions and cannot pair with this one.
            frames.clear();
            frames.effective_width = eff_w;
            frames.effective_height = eff_h;
            self.inner.cache.lock().clear();
        }
        frames.base_width = width;
        frames.base_height = height;
        frames.previous = frames.current.take();
        frames.current = Some(buffer);
        drop(frames);

        self.inner.fps.lock().record_captured();
        Ok(())
    }

    /// Stop interpolating and release resources; idempotent
    pub fn stop(&self) {
        let prior = self.inner.state.swap(STATE_STOPPED, Ordering::AcqRel);
        if let Some(handle) = self.cadence.lock().take() {
            let _ = handle.join();
        }
        if prior == STATE_RUNNING {
            self.inner.scheduler.shutdown();
            self.inner.frames.lock().clear();
            self.inner.cache.lock().clear();
            let outstanding = self.inner.pool.check_leaks();
            if outstanding > 0 {
                warn!(outstanding, "buffers still outstanding at stop");
            }
            self.inner.pool.clear();
            info!("engine stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.load(Ordering::Acquire) == STATE_RUNNING
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Nearest-neighbor RGBA downsample for resolution-scaled ingestion
fn downsample_nearest(
    src: &[u8],
    src_w: usize,
    src_h: usize,
    dst: &mut [u8],
    dst_w: usize,
    dst_h: usize,
) {
    for y in 0..dst_h {
        let sy = y * src_h / dst_h;
        for x in 0..dst_w {
            let sx = x * src_w / dst_w;
            let s = (sy * src_w + sx) * 4;
            let d = (y * dst_w + x) * 4;
            dst[d..d + 4].copy_from_slice(&src[s..s + 4]);
        }
    }
}

fn cadence_loop(inner: Arc<EngineInner>) {
    let mut last_tick = Instant::now();
    let mut frame_index: u64 = 0;

    while inner.state.load(Ordering::Acquire) == STATE_RUNNING {
        let target = inner.quality.state().target_fps.max(1.0);
        let interval = Duration::from_secs_f32(1.0 / target);
        thread::sleep(interval);
        if inner.state.load(Ordering::Acquire) != STATE_RUNNING {
            break;
        }

        let elapsed = last_tick.elapsed();
        last_tick = Instant::now();
        let frames_due = ((elapsed.as_secs_f32() / interval.as_secs_f32()) as u32).max(1);

        let measured = inner.fps.lock().last_fps();
        let update = inner.quality.update(measured, inner.monitor.is_charging());
        inner.quality.cap_target_fps(inner.monitor.refresh_rate());
        if update.resolution_changed {
            debug!(
                resolution_scale = update.resolution_scale,
                "resolution scale changed, dropping cached motion"
            );
            inner.cache.lock().clear();
        }

        for i in 0..frames_due {
            frame_index += 1;
            let priority = if frame_index % BOOST_PERIOD == 0 {
                PRIORITY_ESTIMATION_BOOST
            } else {
                PRIORITY_ESTIMATION
            };
            let factor = i as f32 / frames_due as f32;
            let job_inner = Arc::clone(&inner);
            match inner
                .scheduler
                .submit(priority, move || run_interpolation(&job_inner, factor))
            {
                Ok(()) => {}
                Err(err) if err.is_fatal() => {
                    error!(%err, "scheduler overloaded beyond retry ceiling");
                    fail_stop(&inner);
                    return;
                }
                Err(err) => {
                    warn!(%err, "dropping interpolation tick");
                    return;
                }
            }
        }

        if let Some(fps) = inner.fps.lock().sample() {
            inner.sink.on_fps_sample(fps);
        }
    }
}

/// Estimation job body: snapshot the pair, interpolate, queue the render
fn run_interpolation(inner: &Arc<EngineInner>, factor: f32) {
    if inner.state.load(Ordering::Acquire) != STATE_RUNNING {
        return;
    }

    let snapshot = {
        let frames = inner.frames.lock();
        match (&frames.previous, &frames.current) {
            (Some(prev), Some(curr)) if prev.len() == curr.len() => Some((
                prev.data().to_vec(),
                curr.data().to_vec(),
                frames.effective_width,
                frames.effective_height,
            )),
            _ => None,
        }
    };
    let Some((prev, curr, width, height)) = snapshot else {
        return;
    };

    if let Err(err) = interpolate_pair(inner, &prev, &curr, width, height, factor) {
        if err.is_fatal() {
            error!(%err, "fatal pipeline error");
            fail_stop(inner);
        } else {
            warn!(%err, "skipping frame pair");
        }
    }
}

fn interpolate_pair(
    inner: &Arc<EngineInner>,
    prev: &[u8],
    curr: &[u8],
    width: usize,
    height: usize,
    factor: f32,
) -> Result<()> {
    let difference = blend::frame_difference(prev, curr)?;
    let mut out = inner.pool.acquire(width * height * 4)?;

    if blend::should_skip(difference) {
        out.copy_from_slice(curr)?;
    } else {
        let block_size = inner.quality.retune_block_size(difference);
        let search_range = inner.quality.state().search_range;
        let params = EstimationParams {
            block_size,
            search_range,
            levels: DEFAULT_PYRAMID_LEVELS,
        };
        let field = inner.estimator.estimate(prev, curr, width, height, &params)?;
        let gyro = inner.gyro.lock().current_offset();
        blend::blend_frames(prev, curr, out.data_mut(), width, height, &field, factor, gyro)?;
        inner.cache.lock().push(&field)?;
    }

    // A resolution change while this job was in flight invalidates the
    // output; drop it rather than present mismatched dimensions.
    {
        let frames = inner.frames.lock();
        if (frames.effective_width, frames.effective_height) != (width, height) {
            return Ok(());
        }
    }

    let render_inner = Arc::clone(inner);
    inner.scheduler.submit(PRIORITY_RENDER, move || {
        if render_inner.state.load(Ordering::Acquire) != STATE_RUNNING {
            return;
        }
        render_inner
            .sink
            .on_interpolated_frame(out.data(), width, height);
        render_inner.fps.lock().record_interpolated();
    })
}

/// Fatal-path shutdown from inside the pipeline
///
/// Flips the state so cadence and workers wind down on their own; the
/// joining cleanup happens in [`Engine::stop`] or drop.
fn fail_stop(inner: &Arc<EngineInner>) {
    inner.state.store(STATE_STOPPED, Ordering::Release);
    inner.frames.lock().clear();
    inner.cache.lock().clear();
    inner.pool.clear();
    inner.sink.on_fps_sample(0.0);
}
