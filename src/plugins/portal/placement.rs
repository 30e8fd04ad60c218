//! Fitting a portal onto a surface hit by the portal gun.
//!
//! The portal rectangle must stay within the bounding box of the object that was hit. The
//! solver starts from the impact point and, axis by axis, slides the portal inside its own plane
//! until its footprint fits. This is a bounding box approximation: concave geometry can still let a
//! portal hang over an edge.

use bevy::prelude::*;

use super::{geometry::Basis, state::PortalKind};

const NEARLY_ZERO: f32 = 1e-6;
/// The per-axis corrections can disturb axes fixed earlier when the portal is tilted, so the
/// whole pass is repeated until it settles.
const MAX_FIT_PASSES: usize = 4;

/// Axis aligned box, as a center and half extents.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub center: Vec3,
    pub extent: Vec3,
}

impl Bounds {
    pub fn from_min_max(min: Vec3, max: Vec3) -> Bounds {
        Bounds {
            center: (min + max) / 2.,
            extent: (max - min).abs() / 2.,
        }
    }

    pub fn min(&self) -> Vec3 {
        self.center - self.extent
    }

    pub fn max(&self) -> Vec3 {
        self.center + self.extent
    }

    /// World bounds of a local box moved by `transform`.
    pub fn transformed(&self, transform: &GlobalTransform) -> Bounds {
        let matrix = transform.compute_matrix();
        let abs = Mat3::from_cols(
            matrix.x_axis.truncate().abs(),
            matrix.y_axis.truncate().abs(),
            matrix.z_axis.truncate().abs(),
        );
        Bounds {
            center: matrix.transform_point3(self.center),
            extent: abs * self.extent,
        }
    }

    pub fn contains(&self, point: Vec3) -> bool {
        let d = (point - self.center).abs();
        d.x <= self.extent.x && d.y <= self.extent.y && d.z <= self.extent.z
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceKind {
    /// Static geometry that accepts portals.
    Portalable,
    /// Static geometry that rejects portals.
    Blocking,
    /// A movable physics object.
    Dynamic,
    /// The surface of a portal.
    Portal(PortalKind),
}

/// One blocking hit of a line trace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceHit {
    pub point: Vec3,
    pub normal: Vec3,
    pub distance: f32,
    pub entity: Entity,
    pub bounds: Option<Bounds>,
    pub surface: SurfaceKind,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalPlacement {
    pub center: Vec3,
    pub rotation: Quat,
}

/// Orientation of a portal placed on a surface with the given normal.
///
/// The current orientation is turned along the shortest arc so that its forward vector matches the
/// normal, then spun around the normal so that the portal stands level. On floors and ceilings
/// there is no level, so the portal's up vector is aimed at where the player is facing instead.
pub fn portal_rotation(current: Quat, normal: Vec3, player_forward: Vec3) -> Quat {
    let normal = normal.normalize();
    let current_forward = current * Vec3::NEG_Z;
    let rotation = Quat::from_rotation_arc(current_forward, normal) * current;

    let level_up = reject(Vec3::Y, normal);
    let target_up = if level_up.length_squared() > 1e-4 {
        level_up.normalize()
    } else {
        let facing = reject(player_forward, normal);
        if facing.length_squared() < NEARLY_ZERO {
            return rotation.normalize();
        }
        facing.normalize()
    };

    let up = rotation * Vec3::Y;
    let angle = up.cross(target_up).dot(normal).atan2(up.dot(target_up));
    (Quat::from_axis_angle(normal, angle) * rotation).normalize()
}

fn reject(v: Vec3, normal: Vec3) -> Vec3 {
    v - normal * v.dot(normal)
}

/// Offset within the portal plane that moves its center by `delta` along `axis` while keeping the
/// coordinate along `axis x forward` unchanged.
fn in_plane_offset(basis: &Basis, axis: Vec3, delta: f32) -> Option<Vec3> {
    let up_u = basis.up.dot(axis);
    let right_u = basis.right.dot(axis);

    if up_u.abs() < NEARLY_ZERO && right_u.abs() < NEARLY_ZERO {
        // The axis is the portal normal: sliding in the plane cannot change it.
        return None;
    }
    if up_u.abs() < NEARLY_ZERO {
        return Some(basis.right * (delta / right_u));
    }
    if right_u.abs() < NEARLY_ZERO {
        return Some(basis.up * (delta / up_u));
    }

    let v = axis.cross(basis.forward);
    let up_v = basis.up.dot(v);
    let right_v = basis.right.dot(v);
    let det = up_u * right_v - right_u * up_v;
    if det.abs() < NEARLY_ZERO {
        return None;
    }
    let delta_up = delta * right_v / det;
    let delta_right = -delta * up_v / det;
    Some(basis.up * delta_up + basis.right * delta_right)
}

/// Correction needed along one world axis, or `None` when the portal cannot fit on that axis.
fn fit_axis(bounds: &Bounds, basis: &Basis, half_size: Vec2, point: Vec3, axis: Vec3) -> Option<Vec3> {
    let center_u = bounds.center.dot(axis);
    let extent_u = bounds.extent.dot(axis).abs();
    let (u_min, u_max) = (center_u - extent_u, center_u + extent_u);

    let portal_half_u =
        half_size.y * basis.up.dot(axis).abs() + half_size.x * basis.right.dot(axis).abs();
    let portal_min = u_min + portal_half_u;
    let portal_max = u_max - portal_half_u;
    if portal_max < portal_min {
        return None;
    }

    let u = point.dot(axis);
    if u < portal_min {
        in_plane_offset(basis, axis, portal_min - u)
    } else if u > portal_max {
        in_plane_offset(basis, axis, portal_max - u)
    } else {
        Some(Vec3::ZERO)
    }
}

/// Portal center and orientation for a hit, or `None` when the portal does not fit on the hit
/// object.
pub fn solve_placement(
    hit: &TraceHit,
    current_rotation: Quat,
    player_forward: Vec3,
    half_size: Vec2,
    wall_offset: f32,
) -> Option<PortalPlacement> {
    let bounds = hit.bounds?;
    let rotation = portal_rotation(current_rotation, hit.normal, player_forward);
    let basis = Basis::from_rotation(rotation);

    let mut center = hit.point - hit.normal.normalize() * wall_offset;
    for _ in 0..MAX_FIT_PASSES {
        let mut moved = false;
        for axis in [Vec3::X, Vec3::Y, Vec3::Z] {
            let offset = fit_axis(&bounds, &basis, half_size, center, axis)?;
            if offset.length_squared() > NEARLY_ZERO * NEARLY_ZERO {
                center += offset;
                moved = true;
            }
        }
        if !moved {
            return Some(PortalPlacement { center, rotation });
        }
    }
    debug!("Portal placement did not settle on {:?}", hit.entity);
    None
}
