//! Debug overlays, toggled with F3.

pub mod draw;

use bevy::prelude::*;
use bevy_prototype_debug_lines::DebugLines;

use crate::plugins::{
    portal::{
        CaptureCamera, MainCamera, PortalCameraProjection, PortalClone, PortalConfig, PortalKind,
        PortalPair,
    },
    portal_gun::GrabbedObject,
};

use draw::{draw_camera_frustum, draw_portal_frame};

#[derive(Debug)]
pub struct DebugPlugin;

impl Plugin for DebugPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<DebugOverlay>()
            .add_system(toggle_overlay)
            .add_system(draw_portals)
            .add_system(draw_capture_frusta)
            .add_system(draw_clones)
            .add_system(draw_grab);
    }
}

#[derive(Debug, Default, Resource)]
struct DebugOverlay {
    enabled: bool,
}

fn toggle_overlay(mut overlay: ResMut<DebugOverlay>, keys: Res<Input<KeyCode>>) {
    if keys.just_pressed(KeyCode::F3) {
        overlay.enabled = !overlay.enabled;
        info!("Debug overlay: {}", overlay.enabled);
    }
}

fn draw_portals(
    overlay: Res<DebugOverlay>,
    pair: Res<PortalPair>,
    config: Res<PortalConfig>,
    mut lines: ResMut<DebugLines>,
) {
    if !overlay.enabled {
        return;
    }
    for kind in PortalKind::ALL {
        let portal = pair.portal(kind);
        if !portal.is_active() {
            continue;
        }
        let color = match kind {
            PortalKind::Blue => Color::BLUE,
            PortalKind::Orange => Color::ORANGE,
        };
        draw_portal_frame(portal.frame(), config.portal_half_size(), color, &mut lines);
    }
}

fn draw_capture_frusta(
    overlay: Res<DebugOverlay>,
    cameras: Query<(&Camera, &Transform, &PortalCameraProjection), With<CaptureCamera>>,
    mut lines: ResMut<DebugLines>,
) {
    if !overlay.enabled {
        return;
    }
    for (camera, transform, projection) in &cameras {
        if camera.is_active {
            draw_camera_frustum(transform, projection, &mut lines);
        }
    }
}

/// Link every clone to the actor it stands in for.
fn draw_clones(
    overlay: Res<DebugOverlay>,
    clones: Query<(&PortalClone, &GlobalTransform)>,
    transforms: Query<&GlobalTransform>,
    mut lines: ResMut<DebugLines>,
) {
    if !overlay.enabled {
        return;
    }
    for (clone, transform) in &clones {
        if let Ok(original) = transforms.get(clone.original) {
            lines.line_colored(original.translation(), transform.translation(), 0., Color::YELLOW);
        }
    }
}

fn draw_grab(
    overlay: Res<DebugOverlay>,
    grabbed: Res<GrabbedObject>,
    main_camera: Option<Res<MainCamera>>,
    transforms: Query<&GlobalTransform>,
    mut lines: ResMut<DebugLines>,
) {
    if !overlay.enabled {
        return;
    }
    let (grab, main_camera) = match (grabbed.grab(), main_camera) {
        (Some(grab), Some(main_camera)) => (grab, main_camera),
        _ => return,
    };
    if let (Ok(camera), Ok(object)) = (
        transforms.get(main_camera.camera),
        transforms.get(grab.entity),
    ) {
        let color = if grab.through.is_some() {
            Color::PURPLE
        } else {
            Color::GREEN
        };
        lines.line_colored(camera.translation(), object.translation(), 0., color);
    }
}
