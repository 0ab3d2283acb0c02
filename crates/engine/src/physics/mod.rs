mod body;
mod world;

use thiserror::Error;

pub use body::{BodyHandle, BodyKind, Material, Pose, Shape};
pub use world::PhysicsWorld;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PhysicsError {
    #[error("body handle {index}v{generation} does not refer to a live body")]
    InvalidHandle { index: u32, generation: u32 },
    #[error("rejected degenerate body: {reason}")]
    InvalidShape { reason: &'static str },
}
