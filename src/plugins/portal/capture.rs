//! Rendering what can be seen through a portal, including the portals visible inside that view.
//!
//! Each level maps the viewer one more time through the link, so the deepest capture has to be
//! rendered first: shallower captures show it on the portal surface.

use bevy::prelude::*;

use super::{
    clip_location::{cannot_see_portal, project_portal, ClipLayer, ClipRect},
    config::PortalConfig,
    geometry::PortalMapping,
    state::PortalKind,
    world::CameraPose,
};

/// One scene render issued for a portal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureRequest {
    pub portal: PortalKind,
    /// Number of levels left when the request was issued. `1` is the deepest level.
    pub remaining: u32,
    pub camera: Transform,
    pub projection: Mat4,
    /// Plane of the linked portal. Geometry behind it must not show up in the image.
    pub clip_plane: Vec4,
    /// Draw the portal surface with last frame's image instead of the live one.
    pub use_recursive_material: bool,
}

pub trait SceneCapture {
    fn capture(&mut self, request: &CaptureRequest);

    fn record_clip_location(&mut self, portal: PortalKind, layer: ClipLayer, rect: ClipRect);

    /// Keep the image just rendered so that next frame's deepest capture can show it.
    fn copy_to_recursive_texture(&mut self, portal: PortalKind);
}

struct RecursiveCapture<'a> {
    portal: PortalKind,
    mapping: PortalMapping,
    projection: Mat4,
    half_size: Vec2,
    config: &'a PortalConfig,
}

impl RecursiveCapture<'_> {
    fn run(&self, camera: Transform, remaining: u32, capture: &mut dyn SceneCapture) -> usize {
        if remaining == 0 {
            return 0;
        }

        let link = self.mapping.dest;
        let mapped = self.mapping.transform(&camera);
        if link.is_in_front(mapped.translation) {
            return 0;
        }
        if mapped.forward().dot(link.forward()) < self.config.view_cull_dot {
            return 0;
        }

        let deeper = self.run(mapped, remaining - 1, capture);

        capture.capture(&CaptureRequest {
            portal: self.portal,
            remaining,
            camera: mapped,
            projection: self.projection,
            clip_plane: link.plane(),
            use_recursive_material: remaining == 1,
        });

        if remaining <= 2 && self.portals_facing() {
            let view_projection = self.projection * mapped.compute_matrix().inverse();
            let rect = project_portal(&view_projection, &self.mapping.src, self.half_size);
            if remaining == 1 {
                capture.record_clip_location(self.portal, ClipLayer::Back, rect);
                capture.copy_to_recursive_texture(self.portal);
            } else {
                capture.record_clip_location(self.portal, ClipLayer::Front, rect);
            }
        }

        deeper + 1
    }

    fn portals_facing(&self) -> bool {
        self.mapping.src.forward().dot(self.mapping.dest.forward()) < self.config.facing_dot
    }
}

/// Capture the view through the source portal of `mapping` from `camera`, up to `depth` levels
/// deep. Returns the number of captures issued.
pub fn capture_recursive(
    portal: PortalKind,
    mapping: PortalMapping,
    camera: CameraPose,
    depth: u32,
    config: &PortalConfig,
    capture: &mut dyn SceneCapture,
) -> usize {
    RecursiveCapture {
        portal,
        mapping,
        projection: camera.projection,
        half_size: config.portal_half_size(),
        config,
    }
    .run(camera.transform, depth, capture)
}

/// Per-frame entry point: nothing is rendered when the game camera cannot see the portal at all.
pub fn capture_portal_scene(
    portal: PortalKind,
    mapping: PortalMapping,
    camera: CameraPose,
    config: &PortalConfig,
    capture: &mut dyn SceneCapture,
) -> usize {
    if cannot_see_portal(&camera.view_projection(), &mapping.src, config.portal_half_size()) {
        return 0;
    }
    capture_recursive(portal, mapping, camera, config.max_recursion, config, capture)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::portal::geometry::PortalFrame;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_4, PI};

    #[derive(Default)]
    struct RecordingCapture {
        requests: Vec<CaptureRequest>,
        clips: Vec<ClipLayer>,
        copies: usize,
    }

    impl SceneCapture for RecordingCapture {
        fn capture(&mut self, request: &CaptureRequest) {
            self.requests.push(*request);
        }

        fn record_clip_location(&mut self, _: PortalKind, layer: ClipLayer, _: ClipRect) {
            self.clips.push(layer);
        }

        fn copy_to_recursive_texture(&mut self, _: PortalKind) {
            self.copies += 1;
        }
    }

    fn projection() -> Mat4 {
        Mat4::perspective_infinite_reverse_rh(FRAC_PI_4, 16. / 9., 0.1)
    }

    /// A faces +Z from the origin, B faces it back from 10m away.
    fn facing_pair() -> PortalMapping {
        let a = PortalFrame::new(Vec3::ZERO, Quat::from_rotation_y(PI));
        let b = PortalFrame::new(Vec3::new(0., 0., 10.), Quat::IDENTITY);
        PortalMapping::new(a, b)
    }

    fn camera_at(eye: Vec3, target: Vec3) -> CameraPose {
        CameraPose {
            transform: Transform::from_translation(eye).looking_at(target, Vec3::Y),
            projection: projection(),
        }
    }

    #[test]
    fn facing_portals_capture_every_level_deepest_first() {
        let config = PortalConfig::default();
        let mut capture = RecordingCapture::default();
        let camera = camera_at(Vec3::new(0., 0., 5.), Vec3::ZERO);

        let count = capture_portal_scene(PortalKind::Blue, facing_pair(), camera, &config, &mut capture);

        assert_eq!(count, 2);
        assert_eq!(capture.requests.len(), 2);
        assert_eq!(capture.requests[0].remaining, 1);
        assert!(capture.requests[0].use_recursive_material);
        assert!(!capture.requests[1].use_recursive_material);
        // Every capture camera sits behind the linked portal.
        for request in &capture.requests {
            assert!(request.camera.translation.z > 10.);
            assert_eq!(request.clip_plane, facing_pair().dest.plane());
        }
        assert_eq!(capture.clips, vec![ClipLayer::Back, ClipLayer::Front]);
        assert_eq!(capture.copies, 1);
    }

    #[test]
    fn depth_bounds_the_number_of_captures() {
        let config = PortalConfig::default();
        let camera = camera_at(Vec3::new(0., 0., 5.), Vec3::ZERO);
        for depth in 0..6 {
            let mut capture = RecordingCapture::default();
            let count =
                capture_recursive(PortalKind::Blue, facing_pair(), camera, depth, &config, &mut capture);
            assert_eq!(count, depth as usize);
            assert_eq!(capture.requests.len(), depth as usize);
        }
    }

    #[test]
    fn random_setups_never_exceed_depth() {
        let config = PortalConfig::default();
        let mut rng = StdRng::seed_from_u64(31);
        let random_frame = |rng: &mut StdRng| {
            PortalFrame::new(
                Vec3::new(rng.gen_range(-20.0..20.0), rng.gen_range(0.0..5.0), rng.gen_range(-20.0..20.0)),
                Quat::from_euler(EulerRot::YXZ, rng.gen_range(-PI..PI), rng.gen_range(-1.0..1.0), 0.),
            )
        };
        for _ in 0..128 {
            let mapping = PortalMapping::new(random_frame(&mut rng), random_frame(&mut rng));
            let camera = CameraPose {
                transform: random_frame(&mut rng).transform(),
                projection: projection(),
            };
            let depth = rng.gen_range(0..5);
            let mut capture = RecordingCapture::default();
            let count = capture_recursive(PortalKind::Orange, mapping, camera, depth, &config, &mut capture);
            assert!(count <= depth as usize);
            assert_eq!(count, capture.requests.len());
        }
    }

    #[test]
    fn camera_behind_the_portal_is_culled() {
        let config = PortalConfig::default();
        let mut capture = RecordingCapture::default();
        // Looking at the back of A: the mapped camera lands in front of B.
        let camera = camera_at(Vec3::new(0., 0., -5.), Vec3::ZERO);
        let count = capture_recursive(PortalKind::Blue, facing_pair(), camera, 2, &config, &mut capture);
        assert_eq!(count, 0);
        assert!(capture.requests.is_empty());
    }

    #[test]
    fn camera_looking_away_is_culled() {
        let config = PortalConfig::default();
        let mut capture = RecordingCapture::default();
        let camera = camera_at(Vec3::new(0., 0., 5.), Vec3::new(0., 0., 10.));
        let count = capture_recursive(PortalKind::Blue, facing_pair(), camera, 2, &config, &mut capture);
        assert_eq!(count, 0);

        // The game camera does not see the portal either, so the frame is skipped up front.
        let count = capture_portal_scene(PortalKind::Blue, facing_pair(), camera, &config, &mut capture);
        assert_eq!(count, 0);
    }

    #[test]
    fn perpendicular_portals_skip_clip_recording() {
        let config = PortalConfig::default();
        let a = PortalFrame::new(Vec3::ZERO, Quat::from_rotation_y(PI));
        let b = PortalFrame::new(Vec3::new(10., 0., 0.), Quat::from_rotation_y(FRAC_PI_2));
        let mut capture = RecordingCapture::default();
        let camera = camera_at(Vec3::new(0., 0., 5.), Vec3::ZERO);

        let count =
            capture_portal_scene(PortalKind::Blue, PortalMapping::new(a, b), camera, &config, &mut capture);

        assert_eq!(count, 2);
        assert!(capture.clips.is_empty());
        assert_eq!(capture.copies, 0);
    }
}
