use glam::{Quat, Vec3};

use super::PhysicsError;

/// Position and orientation of a body, in world space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            orientation: Quat::IDENTITY,
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.orientation.is_finite()
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Sphere { radius: f32 },
    /// Infinite solid region below the plane `dot(normal, p) = offset`.
    HalfSpace { normal: Vec3, offset: f32 },
}

impl Shape {
    pub(crate) fn validate(&self) -> Result<(), PhysicsError> {
        match self {
            Shape::Sphere { radius } => {
                if !radius.is_finite() {
                    return Err(PhysicsError::InvalidShape {
                        reason: "sphere radius is not finite",
                    });
                }
                if *radius <= 0.0 {
                    return Err(PhysicsError::InvalidShape {
                        reason: "sphere radius must be positive",
                    });
                }
            }
            Shape::HalfSpace { normal, offset } => {
                if !normal.is_finite() || !offset.is_finite() {
                    return Err(PhysicsError::InvalidShape {
                        reason: "half-space plane is not finite",
                    });
                }
                if normal.length_squared() < 1.0e-12 {
                    return Err(PhysicsError::InvalidShape {
                        reason: "half-space normal has zero length",
                    });
                }
            }
        }
        Ok(())
    }
}

/// Surface response parameters. Restitution is clamped to `[0, 1]` on body
/// creation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Material {
    pub restitution: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self { restitution: 0.2 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// Never integrated; participates in collision as an immovable obstacle.
    Static,
    Dynamic,
}

/// Stable identity for a body. The generation detects slot reuse, so a handle
/// to a removed body stays invalid even if its slot is recycled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyHandle {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl BodyHandle {
    pub fn index(&self) -> u32 {
        self.index
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RigidBody {
    pub(crate) kind: BodyKind,
    pub(crate) shape: Shape,
    pub(crate) material: Material,
    pub(crate) pose: Pose,
    pub(crate) prev_pose: Pose,
    pub(crate) linear_velocity: Vec3,
    pub(crate) angular_velocity: Vec3,
    pub(crate) inv_mass: f32,
}

impl RigidBody {
    pub(crate) fn new(kind: BodyKind, shape: Shape, pose: Pose, material: Material) -> Self {
        let inv_mass = match kind {
            BodyKind::Static => 0.0,
            // Unit mass; mass ratios are not part of the creation surface yet.
            BodyKind::Dynamic => 1.0,
        };
        Self {
            kind,
            shape,
            material: Material {
                restitution: material.restitution.clamp(0.0, 1.0),
            },
            pose,
            prev_pose: pose,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            inv_mass,
        }
    }
}
