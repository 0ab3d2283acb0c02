use std::path::Path;

use kestrel_engine::{
    file_bytes_loader, resolve_app_paths, run_frames, AssetKey, AssetKind, Engine, EngineConfig,
    FrameContext, NullCaptureBackend, RenderSink, SystemClock,
};
use kestrel_engine::physics::{BodyKind, Material, Pose, Shape};
use kestrel_engine::scene::interpolate_pose;
use glam::Vec3;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const DEMO_FRAME_COUNT: u64 = 600;

/// Headless stand-in for a renderer: interpolates body transforms with the
/// frame's alpha and logs a sparse trace of what would be drawn.
struct LoggingSink {
    frames_submitted: u64,
}

impl RenderSink for LoggingSink {
    fn submit(&mut self, frame: FrameContext<'_>) {
        self.frames_submitted += 1;
        if self.frames_submitted % 120 != 0 {
            return;
        }
        for sample in &frame.current.bodies {
            let previous = frame
                .previous
                .find(sample.handle)
                .map(|prev| prev.current)
                .unwrap_or(sample.previous);
            let pose = interpolate_pose(&previous, &sample.current, frame.alpha);
            info!(
                body = sample.handle.index(),
                x = pose.position.x,
                y = pose.position.y,
                z = pose.position.z,
                alpha = frame.alpha,
                "draw_body"
            );
        }
    }
}

fn main() {
    init_tracing();
    info!("=== Kestrel Demo Startup ===");

    if let Err(err) = run() {
        error!(error = %err, "startup_failed");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let paths = match resolve_app_paths() {
        Ok(paths) => Some(paths),
        Err(err) => {
            warn!(error = %err, "project root not found; using built-in defaults");
            None
        }
    };
    let config = match &paths {
        Some(paths) => {
            spawn_demo_assets(&paths.assets_dir);
            load_config(&paths.config_path)
        }
        None => EngineConfig::default(),
    };

    let mut engine = Engine::new(&config, Box::new(NullCaptureBackend))?;
    populate_world(&mut engine)?;

    // Warm the cache with whatever the demo assets directory holds.
    if let Some(paths) = &paths {
        let key = AssetKey::new(AssetKind::Raw, "hello.txt", "")?;
        let handle = engine
            .assets()
            .acquire(key, file_bytes_loader(&paths.assets_dir));
        engine.assets().release(handle);
    }

    let mut clock = SystemClock::new();
    let mut sink = LoggingSink {
        frames_submitted: 0,
    };
    run_frames(&mut engine, &mut clock, &mut sink, DEMO_FRAME_COUNT);

    let metrics = engine.metrics_handle().snapshot();
    info!(
        fps = metrics.fps,
        sps = metrics.sps,
        frame_time_ms = metrics.frame_time_ms,
        "final_metrics"
    );
    Ok(())
}

fn populate_world(engine: &mut Engine) -> Result<(), Box<dyn std::error::Error>> {
    let world = engine.world_mut();
    world.add_body(
        BodyKind::Static,
        Shape::HalfSpace {
            normal: Vec3::Y,
            offset: 0.0,
        },
        Pose::IDENTITY,
        Material { restitution: 0.3 },
    )?;
    for i in 0..5 {
        world.add_body(
            BodyKind::Dynamic,
            Shape::Sphere { radius: 0.5 },
            Pose::from_position(Vec3::new(i as f32 * 1.5 - 3.0, 4.0 + i as f32, 0.0)),
            Material { restitution: 0.5 },
        )?;
    }
    Ok(())
}

fn load_config(path: &Path) -> EngineConfig {
    match EngineConfig::load_from_file(path) {
        Ok(config) => config,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "falling back to default engine config");
            EngineConfig::default()
        }
    }
}

fn spawn_demo_assets(assets_dir: &Path) {
    if let Err(err) = std::fs::create_dir_all(assets_dir) {
        warn!(error = %err, "could not create assets directory");
        return;
    }
    let hello = assets_dir.join("hello.txt");
    if !hello.exists() {
        if let Err(err) = std::fs::write(&hello, b"kestrel demo asset\n") {
            warn!(error = %err, "could not write demo asset");
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}
