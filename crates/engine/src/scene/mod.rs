use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use glam::{Quat, Vec3};
use tracing::warn;

use crate::physics::{BodyHandle, Pose};

static SCENE_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_scene_lock_poison_once(operation: &'static str) {
    if SCENE_LOCK_POISON_WARNED
        .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        warn!(operation, "scene buffer lock poisoned; recovered inner value");
    }
}

/// One body's transforms inside a snapshot: the step that produced the
/// snapshot and the step before it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BodySample {
    pub handle: BodyHandle,
    pub previous: Pose,
    pub current: Pose,
}

/// Immutable, versioned copy of all body transforms at the end of a fixed
/// step. Published snapshots are never mutated; a newer version supersedes.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneSnapshot {
    pub version: u64,
    pub sim_steps: u64,
    pub bodies: Vec<BodySample>,
}

impl SceneSnapshot {
    /// Placeholder used before the first fixed step has produced real state.
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            version: 0,
            sim_steps: 0,
            bodies: Vec::new(),
        })
    }

    pub fn find(&self, handle: BodyHandle) -> Option<&BodySample> {
        self.bodies.iter().find(|sample| sample.handle == handle)
    }
}

/// Blend between a body's last two fixed-step transforms. `alpha` is the
/// scheduler's leftover fraction in `[0, 1)`.
pub fn interpolate_pose(previous: &Pose, current: &Pose, alpha: f32) -> Pose {
    Pose {
        position: previous.position.lerp(current.position, alpha),
        orientation: previous.orientation.slerp(current.orientation, alpha),
    }
}

#[derive(Debug)]
struct SnapshotPair {
    current: Arc<SceneSnapshot>,
    previous: Arc<SceneSnapshot>,
}

/// Hand-off point between the simulation and render contexts.
///
/// `publish` swaps the pair under one mutex, so `latest_two` always observes
/// snapshots from consecutive publish generations; readers clone two `Arc`s
/// and hold no lock while rendering.
#[derive(Debug)]
pub struct SceneStateBuffer {
    pair: Mutex<SnapshotPair>,
    overlay: RwLock<RenderOverlayState>,
}

impl Default for SceneStateBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneStateBuffer {
    pub fn new() -> Self {
        let empty = SceneSnapshot::empty();
        Self {
            pair: Mutex::new(SnapshotPair {
                current: Arc::clone(&empty),
                previous: empty,
            }),
            overlay: RwLock::new(RenderOverlayState::default()),
        }
    }

    /// Called from the simulation path only, once per fixed step.
    pub fn publish(&self, snapshot: Arc<SceneSnapshot>) {
        let mut pair = match self.pair.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn_scene_lock_poison_once("publish");
                poisoned.into_inner()
            }
        };
        let superseded = std::mem::replace(&mut pair.current, snapshot);
        pair.previous = superseded;
    }

    /// Returns `(current, previous)`. Both are the same snapshot until two
    /// steps have been published.
    pub fn latest_two(&self) -> (Arc<SceneSnapshot>, Arc<SceneSnapshot>) {
        let pair = match self.pair.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn_scene_lock_poison_once("latest_two");
                poisoned.into_inner()
            }
        };
        (Arc::clone(&pair.current), Arc::clone(&pair.previous))
    }

    pub fn set_overlay(&self, overlay: RenderOverlayState) {
        match self.overlay.write() {
            Ok(mut guard) => *guard = overlay,
            Err(poisoned) => {
                warn_scene_lock_poison_once("set_overlay");
                *poisoned.into_inner() = overlay;
            }
        }
    }

    pub fn overlay(&self) -> RenderOverlayState {
        match self.overlay.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => {
                warn_scene_lock_poison_once("overlay");
                poisoned.into_inner().clone()
            }
        }
    }
}

/// Render-only state that rides alongside simulation snapshots: the camera,
/// light list, and debug-draw toggle never feed back into physics.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderOverlayState {
    pub camera: Pose,
    pub lights: Vec<Light>,
    pub debug_draw_enabled: bool,
}

impl Default for RenderOverlayState {
    fn default() -> Self {
        Self {
            camera: Pose {
                position: Vec3::new(0.0, 2.0, 8.0),
                orientation: Quat::IDENTITY,
            },
            lights: Vec::new(),
            debug_draw_enabled: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Light {
    pub position: Vec3,
    pub color: Vec3,
    pub intensity: f32,
}
