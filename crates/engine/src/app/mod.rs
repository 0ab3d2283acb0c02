pub mod metrics;
pub mod runner;
pub mod scheduler;

pub use metrics::{LoopMetricsSnapshot, MetricsHandle};
pub use runner::{Clock, Engine, EngineError, FrameContext, RenderSink, SystemClock, run_frames};
pub use scheduler::{FrameScheduler, FrameTick, SimTime};
