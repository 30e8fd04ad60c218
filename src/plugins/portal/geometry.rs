//! Conversion of vectors, points and orientations between the local spaces of two linked portals.
//!
//! Walking through a portal must feel continuous rather than mirrored, so the destination basis is
//! flipped around its up axis: the destination forward and right vectors are negated before the
//! source coordinates are reconstituted in it.

use std::f32::consts::PI;

use bevy::prelude::*;

/// Orthonormal basis of a portal plane. `forward` is the plane normal, pointing out of the surface
/// the portal is attached to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Basis {
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
}

impl Basis {
    pub fn from_rotation(rotation: Quat) -> Basis {
        Basis {
            forward: rotation * Vec3::NEG_Z,
            right: rotation * Vec3::X,
            up: rotation * Vec3::Y,
        }
    }

    /// The basis used on the receiving side of a link: forward and right negated, up unchanged.
    pub fn flipped(self) -> Basis {
        Basis {
            forward: -self.forward,
            right: -self.right,
            up: self.up,
        }
    }

    /// Coordinates of `v` along forward, right and up.
    pub fn coordinates(&self, v: Vec3) -> Vec3 {
        Vec3::new(v.dot(self.forward), v.dot(self.right), v.dot(self.up))
    }

    pub fn compose(&self, coords: Vec3) -> Vec3 {
        coords.x * self.forward + coords.y * self.right + coords.z * self.up
    }
}

/// World placement of a portal plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalFrame {
    pub origin: Vec3,
    pub rotation: Quat,
}

impl Default for PortalFrame {
    fn default() -> Self {
        PortalFrame {
            origin: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

impl PortalFrame {
    pub fn new(origin: Vec3, rotation: Quat) -> PortalFrame {
        PortalFrame {
            origin,
            rotation: rotation.normalize(),
        }
    }

    pub fn basis(&self) -> Basis {
        Basis::from_rotation(self.rotation)
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::NEG_Z
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    pub fn transform(&self) -> Transform {
        Transform::from_translation(self.origin).with_rotation(self.rotation)
    }

    pub fn is_in_front(&self, point: Vec3) -> bool {
        is_point_in_front_of_portal(point, self.origin, self.forward())
    }

    /// Homogeneous plane coordinates `(n, -n.p)`, positive on the front side.
    pub fn plane(&self) -> Vec4 {
        let normal = self.forward();
        Vec4::from((normal, -normal.dot(self.origin)))
    }
}

impl From<Transform> for PortalFrame {
    fn from(transform: Transform) -> Self {
        PortalFrame::new(transform.translation, transform.rotation)
    }
}

/// Mapping from one portal's space into its linked portal's space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalMapping {
    pub src: PortalFrame,
    pub dest: PortalFrame,
    /// Extra turn applied around the destination up axis when mapping orientations.
    pub flip_angle: f32,
}

impl PortalMapping {
    pub fn new(src: PortalFrame, dest: PortalFrame) -> PortalMapping {
        PortalMapping {
            src,
            dest,
            flip_angle: PI,
        }
    }

    pub fn with_flip_angle(mut self, flip_angle: f32) -> PortalMapping {
        self.flip_angle = flip_angle;
        self
    }

    /// The same link travelled in the opposite direction.
    pub fn reversed(&self) -> PortalMapping {
        PortalMapping {
            src: self.dest,
            dest: self.src,
            flip_angle: self.flip_angle,
        }
    }

    pub fn vector(&self, v: Vec3) -> Vec3 {
        transform_vector_to_dest_space(v, self.src.basis(), self.dest.basis().flipped())
    }

    pub fn point(&self, p: Vec3) -> Vec3 {
        transform_point_to_dest_space(
            p,
            self.src.origin,
            self.src.basis(),
            self.dest.origin,
            self.dest.basis().flipped(),
        )
    }

    pub fn quat(&self, q: Quat) -> Quat {
        let diff = self.dest.rotation * self.src.rotation.inverse();
        let turn = Quat::from_axis_angle(self.dest.up(), self.flip_angle);
        (turn * (diff * q)).normalize()
    }

    pub fn transform(&self, transform: &Transform) -> Transform {
        Transform {
            translation: self.point(transform.translation),
            rotation: self.quat(transform.rotation),
            scale: transform.scale,
        }
    }
}

/// Project `target` on the source basis and rebuild it from the same coordinates in the
/// destination basis. Callers pass the already flipped destination basis.
pub fn transform_vector_to_dest_space(target: Vec3, src: Basis, dest: Basis) -> Vec3 {
    dest.compose(src.coordinates(target))
}

pub fn transform_point_to_dest_space(
    target: Vec3,
    src_origin: Vec3,
    src: Basis,
    dest_origin: Vec3,
    dest: Basis,
) -> Vec3 {
    dest_origin + transform_vector_to_dest_space(target - src_origin, src, dest)
}

/// Re-base `target` from the source portal orientation to the destination one, then turn it half a
/// revolution around the destination up axis so that it faces out of the destination portal.
pub fn transform_quat_to_dest_space(
    target: Quat,
    src_rotation: Quat,
    dest_rotation: Quat,
    dest_up: Vec3,
) -> Quat {
    let diff = dest_rotation * src_rotation.inverse();
    let result = diff * target;
    Quat::from_axis_angle(dest_up, PI) * result
}

/// A point is in front of a portal when it lies on the side its normal points to. Points exactly on
/// the plane are not in front.
pub fn is_point_in_front_of_portal(point: Vec3, portal_pos: Vec3, portal_normal: Vec3) -> bool {
    (portal_pos - point).dot(portal_normal) < 0.
}

/// Distance along the ray at which it enters the front face of the portal rectangle, if it does.
pub fn ray_portal_intersection(
    origin: Vec3,
    direction: Vec3,
    frame: &PortalFrame,
    half_width: f32,
    half_height: f32,
) -> Option<f32> {
    let normal = frame.forward();
    let denom = direction.dot(normal);
    // Only rays travelling into the front face can see through a portal.
    if denom >= -f32::EPSILON {
        return None;
    }
    let toi = (frame.origin - origin).dot(normal) / denom;
    if toi < 0. {
        return None;
    }
    let local = origin + direction * toi - frame.origin;
    let within =
        local.dot(frame.right()).abs() <= half_width && local.dot(frame.up()).abs() <= half_height;
    within.then_some(toi)
}
