use bevy::{math::Vec4Swizzles, prelude::*, render::camera::CameraProjection};
use bevy_prototype_debug_lines::DebugLines;

use crate::plugins::portal::{clip_location::PortalCorners, PortalFrame};

pub fn draw_camera_frustum<P: CameraProjection>(
    cam_transform: &Transform,
    projection: &P,
    lines: &mut DebugLines,
) {
    const NEAR_COLOR: Color = Color::BLACK;
    const FAR_COLOR: Color = Color::WHITE;

    let inv_viewprojection =
        (projection.get_projection_matrix() * cam_transform.compute_matrix().inverse()).inverse();

    // Reversed depth: 1 is the near plane, 0 the far plane.
    let corners = [
        Vec4::new(-1., -1., 1., 1.),
        Vec4::new(1., -1., 1., 1.),
        Vec4::new(-1., 1., 1., 1.),
        Vec4::new(1., 1., 1., 1.),
        Vec4::new(-1., -1., 0., 1.),
        Vec4::new(1., -1., 0., 1.),
        Vec4::new(-1., 1., 0., 1.),
        Vec4::new(1., 1., 0., 1.),
    ]
    .map(|v| {
        let vh = inv_viewprojection * v;
        vh.xyz() / vh.w
    });

    // Depth lines
    for i in 0..4 {
        lines.line_gradient(corners[i], corners[i + 4], 0., NEAR_COLOR, FAR_COLOR);
    }
    for (a, b) in [(0, 1), (0, 2), (1, 3), (2, 3)] {
        // Near plane
        lines.line_colored(corners[a], corners[b], 0., NEAR_COLOR);
        // Far plane
        lines.line_colored(corners[a + 4], corners[b + 4], 0., FAR_COLOR);
    }
}

/// Outline of a portal rectangle, with its normal.
pub fn draw_portal_frame(
    frame: &PortalFrame,
    half_size: Vec2,
    color: Color,
    lines: &mut DebugLines,
) {
    let corners = PortalCorners::new(frame, half_size);
    lines.line_colored(corners.left_up, corners.right_up, 0., color);
    lines.line_colored(corners.right_up, corners.right_down, 0., color);
    lines.line_colored(corners.right_down, corners.left_down, 0., color);
    lines.line_colored(corners.left_down, corners.left_up, 0., color);
    lines.line_colored(frame.origin, frame.origin + frame.forward() * 0.5, 0., color);
}
