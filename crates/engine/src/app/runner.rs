use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::info;

use super::metrics::{MetricsAccumulator, MetricsHandle};
use super::scheduler::{FrameScheduler, FrameTick, SimTime};
use crate::assets::{AssetCache, CacheError};
use crate::capture::{CaptureBackend, CaptureBridge};
use crate::config::{ConfigError, EngineConfig};
use crate::physics::PhysicsWorld;
use crate::scene::{SceneSnapshot, SceneStateBuffer};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("invalid engine configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to start asset cache: {0}")]
    Cache(#[from] CacheError),
}

/// Monotonic wall-clock source. Implementations must never report negative
/// or non-finite deltas.
pub trait Clock {
    fn delta_seconds(&mut self) -> f64;
}

#[derive(Debug)]
pub struct SystemClock {
    last: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            last: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn delta_seconds(&mut self) -> f64 {
        let now = Instant::now();
        let delta = now.saturating_duration_since(self.last).as_secs_f64();
        self.last = now;
        delta
    }
}

/// Everything the render collaborator gets for one frame: the interpolation
/// factor and the latest consecutive snapshot pair.
#[derive(Debug)]
pub struct FrameContext<'a> {
    pub alpha: f32,
    pub current: &'a Arc<SceneSnapshot>,
    pub previous: &'a Arc<SceneSnapshot>,
    pub sim_steps: u64,
}

/// One-way render submission collaborator; the core pushes, nothing returns.
pub trait RenderSink {
    fn submit(&mut self, frame: FrameContext<'_>);
}

/// Top-level composition: frame scheduler, physics world, scene hand-off
/// buffer, asset cache, and the capture bridge, wired per the engine config.
#[derive(Debug)]
pub struct Engine {
    scheduler: FrameScheduler,
    world: PhysicsWorld,
    scene: SceneStateBuffer,
    assets: AssetCache,
    capture: CaptureBridge,
    metrics: MetricsAccumulator,
    metrics_handle: MetricsHandle,
    cache_budget_bytes: usize,
}

impl Engine {
    pub fn new(
        config: &EngineConfig,
        capture_backend: Box<dyn CaptureBackend>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let loader_threads = config.resolve_loader_threads();
        info!(
            steps_per_second = config.steps_per_second,
            max_frame_delta_ms = (config.max_frame_delta_seconds * 1000.0) as u64,
            metrics_log_interval_ms = (config.metrics_log_interval_seconds * 1000.0) as u64,
            loader_threads,
            "engine_config"
        );
        Ok(Self {
            scheduler: FrameScheduler::new(
                config.fixed_step_seconds(),
                config.max_frame_delta_seconds,
            ),
            world: PhysicsWorld::new(config.gravity_vec()),
            scene: SceneStateBuffer::new(),
            assets: AssetCache::new(loader_threads)?,
            capture: CaptureBridge::new(capture_backend),
            metrics: MetricsAccumulator::new(config.metrics_log_interval()),
            metrics_handle: MetricsHandle::default(),
            cache_budget_bytes: config.cache_resident_budget_bytes,
        })
    }

    pub fn world_mut(&mut self) -> &mut PhysicsWorld {
        &mut self.world
    }

    pub fn assets(&self) -> &AssetCache {
        &self.assets
    }

    pub fn scene(&self) -> &SceneStateBuffer {
        &self.scene
    }

    pub fn capture_mut(&mut self) -> &mut CaptureBridge {
        &mut self.capture
    }

    pub fn metrics_handle(&self) -> MetricsHandle {
        self.metrics_handle.clone()
    }

    pub fn sim_time(&self) -> SimTime {
        self.scheduler.sim_time()
    }

    /// Runs one frame: catch the simulation up in whole fixed steps, publish
    /// each step's snapshot, then push one render submission with the
    /// interpolation factor. The capture bridge brackets the submission.
    pub fn frame(&mut self, wall_delta: f64, sink: &mut dyn RenderSink) -> FrameTick {
        let Engine {
            scheduler,
            world,
            scene,
            ..
        } = self;
        let tick = scheduler.tick(wall_delta, |dt| {
            let snapshot = world.step(dt as f32);
            scene.publish(snapshot);
        });

        let (current, previous) = self.scene.latest_two();
        self.capture.begin_frame();
        sink.submit(FrameContext {
            alpha: tick.alpha,
            current: &current,
            previous: &previous,
            sim_steps: self.scheduler.sim_time().steps(),
        });
        self.capture.end_frame();

        self.assets.trim(self.cache_budget_bytes);

        self.metrics.record_frame(Duration::from_secs_f64(wall_delta));
        self.metrics.record_steps(tick.steps);
        if let Some(snapshot) = self.metrics.maybe_snapshot(Instant::now()) {
            self.metrics_handle.publish(snapshot);
            info!(
                fps = snapshot.fps,
                sps = snapshot.sps,
                frame_time_ms = snapshot.frame_time_ms,
                bodies = self.world.body_count(),
                "loop_metrics"
            );
        }
        tick
    }
}

/// Drives `frame_count` frames against a clock and sink. The demo binary and
/// soak tests use this in place of a windowing event loop.
pub fn run_frames(
    engine: &mut Engine,
    clock: &mut dyn Clock,
    sink: &mut dyn RenderSink,
    frame_count: u64,
) {
    for _ in 0..frame_count {
        engine.frame(clock.delta_seconds(), sink);
    }
    info!(
        frames = frame_count,
        sim_steps = engine.sim_time().steps(),
        "frame_run_complete"
    );
}
