//! frameboost - real-time video frame interpolation
//!
//! frameboost synthesizes intermediate frames between captured video
//! frames to present motion at a higher rate than the capture source
//! delivers, using pyramidal block-matching motion estimation,
//! motion-compensated blending, and gyro-derived shake compensation.
//!
//! # Architecture
//!
//! The crate is organized into several key modules:
//!
//! - `pool`: Reusable frame buffer pool with leak tracking
//! - `gyro`: Kalman-filtered angular-rate compensation
//! - `motion`: Pyramidal block-matching motion estimation
//! - `cache`: Compressed motion-vector retention
//! - `blend`: Motion-compensated frame synthesis
//! - `quality`: Frame-rate-driven adaptive tuning
//! - `scheduler`: Bounded priority worker pool
//! - `engine`: The interpolation driver tying it all together
//!
//! # Example
//!
//! ```rust,ignore
//! use frameboost::engine::{Engine, EngineConfig};
//!
//! let engine = Engine::new(EngineConfig::new().with_target_fps(60.0), monitor, sink)?;
//! engine.start()?;
//! engine.ingest_frame(&rgba, width, height)?;
//! ```

pub mod blend;
pub mod cache;
pub mod engine;
pub mod error;
pub mod gyro;
pub mod motion;
pub mod pool;
pub mod quality;
pub mod scheduler;

pub use engine::{DeviceMonitor, Engine, EngineConfig, FrameSink};
pub use error::{Error, Result};

/// frameboost version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const VERSION_MAJOR: u32 = 0;
pub const VERSION_MINOR: u32 = 1;
pub const VERSION_PATCH: u32 = 0;

/// Process-wide settings applied once before the first engine starts
///
/// Both knobs are optional: estimation falls back to rayon's default
/// pool sizing, and logging stays silent unless a filter is given.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Maximum number of threads for parallel motion estimation
    pub max_threads: Option<usize>,
    /// Logging filter directive, e.g. `"info"` or `"frameboost=debug"`
    pub log_filter: Option<String>,
}

impl Config {
    pub fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = Some(threads);
        self
    }

    pub fn with_log_filter(mut self, filter: impl Into<String>) -> Self {
        self.log_filter = Some(filter.into());
        self
    }
}

/// Initialize the frameboost library with the given configuration
pub fn init(config: Config) -> Result<()> {
    if let Some(threads) = config.max_threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()
            .map_err(|e| Error::Init(format!("failed to size the estimation pool: {}", e)))?;
    }

    if let Some(filter) = config.log_filter.as_deref() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    Ok(())
}
