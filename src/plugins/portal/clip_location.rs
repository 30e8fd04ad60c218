//! Where a portal's rectangle lands on screen.
//!
//! The recorded rectangles drive the nested-portal compositing in the portal shader: the front
//! rectangle is the portal seen through one level of recursion, the back rectangle the portal seen
//! through the deepest one.

use bevy::{prelude::*, render::render_resource::ShaderType};

use super::geometry::PortalFrame;

/// World space corners of a portal rectangle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortalCorners {
    pub left_up: Vec3,
    pub left_down: Vec3,
    pub right_up: Vec3,
    pub right_down: Vec3,
}

impl PortalCorners {
    pub fn new(frame: &PortalFrame, half_size: Vec2) -> PortalCorners {
        let up = frame.up() * half_size.y;
        let right = frame.right() * half_size.x;
        PortalCorners {
            left_up: frame.origin + up - right,
            left_down: frame.origin - up - right,
            right_up: frame.origin + up + right,
            right_down: frame.origin - up + right,
        }
    }

    pub fn to_array(self) -> [Vec3; 4] {
        [self.left_up, self.left_down, self.right_up, self.right_down]
    }
}

/// Screen placement of the four corners, as texture coordinates: x grows to the right, y grows
/// downwards, both clamped to `[0, 1]`. `z` and `w` keep the projected depth.
#[derive(Debug, Clone, Copy, Default, PartialEq, ShaderType)]
pub struct ClipRect {
    pub left_up: Vec4,
    pub left_down: Vec4,
    pub right_up: Vec4,
    pub right_down: Vec4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClipLayer {
    /// The portal seen through the second deepest capture.
    Front,
    /// The portal seen through the deepest capture.
    Back,
}

fn to_screen(view_projection: &Mat4, world: Vec3) -> Vec4 {
    let clip = *view_projection * world.extend(1.);
    let ndc = clip / clip.w;
    let x = ((ndc.x + 1.) / 2.).clamp(0., 1.);
    let y = (1. - (ndc.y + 1.) / 2.).clamp(0., 1.);
    Vec4::new(x, y, ndc.z, ndc.w)
}

pub fn project_portal(view_projection: &Mat4, frame: &PortalFrame, half_size: Vec2) -> ClipRect {
    let corners = PortalCorners::new(frame, half_size);
    ClipRect {
        left_up: to_screen(view_projection, corners.left_up),
        left_down: to_screen(view_projection, corners.left_down),
        right_up: to_screen(view_projection, corners.right_up),
        right_down: to_screen(view_projection, corners.right_down),
    }
}

/// True when no part of the portal rectangle can appear in the view: every corner is behind the
/// camera, or every corner is outside the same side of the clip volume.
pub fn cannot_see_portal(view_projection: &Mat4, frame: &PortalFrame, half_size: Vec2) -> bool {
    let clip = PortalCorners::new(frame, half_size)
        .to_array()
        .map(|corner| *view_projection * corner.extend(1.));

    if clip.iter().all(|c| c.w <= 0.) {
        return true;
    }
    let outside = |test: fn(&Vec4) -> bool| clip.iter().all(test);
    outside(|c| c.x < -c.w)
        || outside(|c| c.x > c.w)
        || outside(|c| c.y < -c.w)
        || outside(|c| c.y > c.w)
}

/// Latest nested rectangles, read by the portal material each frame.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClipLocations {
    pub front: Option<ClipRect>,
    pub back: Option<ClipRect>,
}

impl ClipLocations {
    pub fn record(&mut self, layer: ClipLayer, rect: ClipRect) {
        match layer {
            ClipLayer::Front => self.front = Some(rect),
            ClipLayer::Back => self.back = Some(rect),
        }
    }

    pub fn clear(&mut self) {
        *self = ClipLocations::default();
    }
}
