use std::sync::Arc;

use glam::{Quat, Vec3};

use super::body::{BodyHandle, BodyKind, Material, Pose, RigidBody, Shape};
use super::PhysicsError;
use crate::scene::{BodySample, SceneSnapshot};

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    body: Option<RigidBody>,
}

/// Authoritative rigid-body simulation. All mutation goes through `&mut self`,
/// so a step can never interleave with `add_body`/`remove_body`/`apply_impulse`.
///
/// Integration and contact resolution walk bodies in ascending slot order,
/// which makes a step a pure function of world state and `dt`: identical
/// inputs reproduce bit-identical snapshots.
#[derive(Debug)]
pub struct PhysicsWorld {
    gravity: Vec3,
    slots: Vec<Slot>,
    free: Vec<u32>,
    snapshot_version: u64,
    steps_taken: u64,
}

impl PhysicsWorld {
    pub fn new(gravity: Vec3) -> Self {
        Self {
            gravity,
            slots: Vec::new(),
            free: Vec::new(),
            snapshot_version: 0,
            steps_taken: 0,
        }
    }

    pub fn add_body(
        &mut self,
        kind: BodyKind,
        shape: Shape,
        pose: Pose,
        material: Material,
    ) -> Result<BodyHandle, PhysicsError> {
        shape.validate()?;
        if !pose.is_finite() {
            return Err(PhysicsError::InvalidShape {
                reason: "initial transform is not finite",
            });
        }

        let body = RigidBody::new(kind, shape, pose, material);
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize].body = Some(body);
                index
            }
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    body: Some(body),
                });
                (self.slots.len() - 1) as u32
            }
        };
        Ok(BodyHandle {
            index,
            generation: self.slots[index as usize].generation,
        })
    }

    pub fn remove_body(&mut self, handle: BodyHandle) -> Result<(), PhysicsError> {
        let slot = self.live_slot_mut(handle)?;
        slot.body = None;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        Ok(())
    }

    pub fn apply_impulse(
        &mut self,
        handle: BodyHandle,
        impulse: Vec3,
    ) -> Result<(), PhysicsError> {
        assert!(
            impulse.is_finite(),
            "apply_impulse called with a non-finite impulse: {impulse:?}"
        );
        let slot = self.live_slot_mut(handle)?;
        let body = slot.body.as_mut().expect("live slot holds a body");
        body.linear_velocity += impulse * body.inv_mass;
        Ok(())
    }

    pub fn body_pose(&self, handle: BodyHandle) -> Result<Pose, PhysicsError> {
        let slot = self
            .slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .ok_or(PhysicsError::InvalidHandle {
                index: handle.index,
                generation: handle.generation,
            })?;
        slot.body
            .as_ref()
            .map(|body| body.pose)
            .ok_or(PhysicsError::InvalidHandle {
                index: handle.index,
                generation: handle.generation,
            })
    }

    pub fn body_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.body.is_some()).count()
    }

    pub fn steps_taken(&self) -> u64 {
        self.steps_taken
    }

    /// Advances every body by one fixed step and returns the resulting
    /// immutable snapshot. Current transforms are rotated into the previous
    /// slot before integration so the snapshot carries both.
    pub fn step(&mut self, dt: f32) -> Arc<SceneSnapshot> {
        assert!(
            dt.is_finite() && dt > 0.0,
            "physics step called with invalid dt: {dt}"
        );

        for slot in &mut self.slots {
            if let Some(body) = slot.body.as_mut() {
                body.prev_pose = body.pose;
                if body.kind == BodyKind::Dynamic {
                    body.linear_velocity += self.gravity * dt;
                    body.pose.position += body.linear_velocity * dt;
                    if body.angular_velocity != Vec3::ZERO {
                        let spin = Quat::from_scaled_axis(body.angular_velocity * dt);
                        body.pose.orientation = (spin * body.pose.orientation).normalize();
                    }
                }
            }
        }

        self.resolve_contacts();

        self.steps_taken += 1;
        self.snapshot_version += 1;
        Arc::new(self.assemble_snapshot())
    }

    fn resolve_contacts(&mut self) {
        let count = self.slots.len();
        for i in 0..count {
            for j in (i + 1)..count {
                if self.slots[i].body.is_none() || self.slots[j].body.is_none() {
                    continue;
                }
                let (left, right) = self.slots.split_at_mut(j);
                let a = left[i].body.as_mut().expect("checked above");
                let b = right[0].body.as_mut().expect("checked above");
                resolve_pair(a, b);
            }
        }
    }

    fn assemble_snapshot(&self) -> SceneSnapshot {
        let bodies = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                slot.body.as_ref().map(|body| BodySample {
                    handle: BodyHandle {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    previous: body.prev_pose,
                    current: body.pose,
                })
            })
            .collect();
        SceneSnapshot {
            version: self.snapshot_version,
            sim_steps: self.steps_taken,
            bodies,
        }
    }

    fn live_slot_mut(&mut self, handle: BodyHandle) -> Result<&mut Slot, PhysicsError> {
        let invalid = PhysicsError::InvalidHandle {
            index: handle.index,
            generation: handle.generation,
        };
        let slot = self.slots.get_mut(handle.index as usize).ok_or(invalid)?;
        if slot.generation != handle.generation || slot.body.is_none() {
            return Err(invalid);
        }
        Ok(slot)
    }
}

fn resolve_pair(a: &mut RigidBody, b: &mut RigidBody) {
    match (a.shape, b.shape) {
        (Shape::Sphere { radius }, Shape::HalfSpace { normal, offset }) => {
            resolve_sphere_half_space(a, radius, normal, offset, b.material.restitution);
        }
        (Shape::HalfSpace { normal, offset }, Shape::Sphere { radius }) => {
            resolve_sphere_half_space(b, radius, normal, offset, a.material.restitution);
        }
        (Shape::Sphere { radius: ra }, Shape::Sphere { radius: rb }) => {
            resolve_sphere_sphere(a, ra, b, rb);
        }
        (Shape::HalfSpace { .. }, Shape::HalfSpace { .. }) => {}
    }
}

fn resolve_sphere_half_space(
    sphere: &mut RigidBody,
    radius: f32,
    plane_normal: Vec3,
    plane_offset: f32,
    plane_restitution: f32,
) {
    if sphere.inv_mass == 0.0 {
        return;
    }
    let normal = plane_normal.normalize();
    let distance = normal.dot(sphere.pose.position) - plane_offset;
    let penetration = radius - distance;
    if penetration <= 0.0 {
        return;
    }

    sphere.pose.position += normal * penetration;
    let normal_speed = sphere.linear_velocity.dot(normal);
    if normal_speed < 0.0 {
        let restitution = sphere.material.restitution.max(plane_restitution);
        sphere.linear_velocity -= normal * ((1.0 + restitution) * normal_speed);
    }
}

fn resolve_sphere_sphere(a: &mut RigidBody, radius_a: f32, b: &mut RigidBody, radius_b: f32) {
    let inv_mass_sum = a.inv_mass + b.inv_mass;
    if inv_mass_sum == 0.0 {
        return;
    }

    let delta = b.pose.position - a.pose.position;
    let distance_sq = delta.length_squared();
    let contact_distance = radius_a + radius_b;
    if distance_sq >= contact_distance * contact_distance {
        return;
    }

    let distance = distance_sq.sqrt();
    // Coincident centers have no stable normal; pick a fixed axis so the
    // outcome stays deterministic.
    let normal = if distance > 1.0e-6 {
        delta / distance
    } else {
        Vec3::Y
    };
    let penetration = contact_distance - distance;

    a.pose.position -= normal * (penetration * a.inv_mass / inv_mass_sum);
    b.pose.position += normal * (penetration * b.inv_mass / inv_mass_sum);

    let relative_speed = (b.linear_velocity - a.linear_velocity).dot(normal);
    if relative_speed < 0.0 {
        let restitution = a.material.restitution.max(b.material.restitution);
        let impulse = -(1.0 + restitution) * relative_speed / inv_mass_sum;
        a.linear_velocity -= normal * (impulse * a.inv_mass);
        b.linear_velocity += normal * (impulse * b.inv_mass);
    }
}
