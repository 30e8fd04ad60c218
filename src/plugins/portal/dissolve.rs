//! Surfaces portals are set in. The material of such a surface stops drawing inside a thin box
//! around each open portal, so that the surface never covers what goes in or comes out.

use bevy::{
    prelude::*,
    reflect::TypeUuid,
    render::render_resource::{AsBindGroup, ShaderRef, ShaderType},
};

use super::{
    geometry::PortalFrame,
    state::{PortalKind, PortalPair},
};

/// Box in which a surface is not drawn, as the transform from world space to a space where the box
/// spans -1 to 1 on every axis.
#[derive(Debug, Clone, Copy, Default, PartialEq, ShaderType)]
pub struct DissolveArea {
    pub world_to_local: Mat4,
    pub active: u32,
}

impl DissolveArea {
    pub fn around(frame: &PortalFrame, half_size: Vec2, half_depth: f32) -> DissolveArea {
        let local_to_world = Transform {
            translation: frame.origin,
            rotation: frame.rotation,
            scale: half_size.extend(half_depth),
        };
        DissolveArea {
            world_to_local: local_to_world.compute_matrix().inverse(),
            active: 1,
        }
    }
}

/// Dissolve areas of both portals, indexed like [`PortalKind::index`]. Portals only dissolve their
/// surface while open.
pub fn dissolve_areas(pair: &PortalPair, half_size: Vec2, half_depth: f32) -> [DissolveArea; 2] {
    PortalKind::ALL.map(|kind| {
        if pair.is_open(kind) {
            DissolveArea::around(pair.portal(kind).frame(), half_size, half_depth)
        } else {
            DissolveArea::default()
        }
    })
}

#[derive(AsBindGroup, Debug, Clone, TypeUuid)]
#[uuid = "7b1b7cb4-5d2e-4f5e-9a77-3c0d3f2f8a61"]
pub struct WallMaterial {
    #[uniform(0)]
    pub uniform: WallUniform,
}

impl WallMaterial {
    pub fn new(color: Color) -> WallMaterial {
        WallMaterial {
            uniform: WallUniform {
                color,
                ..default()
            },
        }
    }

    pub fn dissolve_areas(&self) -> [DissolveArea; 2] {
        [self.uniform.blue, self.uniform.orange]
    }

    pub fn set_dissolve_areas(&mut self, [blue, orange]: [DissolveArea; 2]) {
        self.uniform.blue = blue;
        self.uniform.orange = orange;
    }
}

impl Material for WallMaterial {
    fn fragment_shader() -> ShaderRef {
        "shaders/wall.wgsl".into()
    }
}

#[derive(Debug, Clone, Default, ShaderType)]
pub struct WallUniform {
    pub color: Color,
    pub blue: DissolveArea,
    pub orange: DissolveArea,
}

/// Follow the open portals with the dissolve areas of every wall.
pub(super) fn update_wall_dissolve(
    pair: Res<PortalPair>,
    config: Res<super::PortalConfig>,
    walls: Query<&Handle<WallMaterial>>,
    mut materials: ResMut<Assets<WallMaterial>>,
) {
    let areas = dissolve_areas(&pair, config.portal_half_size(), config.dissolve_half_depth);
    for handle in &walls {
        // Only touch materials that need it, a modified material is sent to the GPU again.
        let stale = materials
            .get(handle)
            .map_or(false, |material| material.dissolve_areas() != areas);
        if stale {
            if let Some(material) = materials.get_mut(handle) {
                material.set_dissolve_areas(areas);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::{FRAC_PI_2, PI};

    use bevy_rapier3d::prelude::Velocity;

    use super::*;
    use crate::plugins::portal::{
        Actor, CameraPose, CollisionProfile, PlayerView, PortalConfig, PortalWorld, SoundCue,
        TraceHit,
    };

    fn dissolves(area: &DissolveArea, point: Vec3) -> bool {
        let local = area.world_to_local.transform_point3(point);
        area.active != 0 && local.abs().cmple(Vec3::ONE).all()
    }

    struct NoActors;

    impl PortalWorld for NoActors {
        fn actor(&self, _: Entity) -> Option<Actor> {
            None
        }
        fn teleport_actor(&mut self, _: Entity, _: Vec3) {}
        fn set_rotation(&mut self, _: Entity, _: Quat) {}
        fn body_mut(&mut self, _: Entity) -> Option<&mut Velocity> {
            None
        }
        fn set_player_view(&mut self, _: Entity, _: PlayerView) {}
        fn set_collision_profile(&mut self, _: Entity, _: CollisionProfile) {}
        fn duplicate_actor(&mut self, _: Entity) -> Option<Entity> {
            None
        }
        fn carried_actors(&self, _: Entity) -> Vec<Entity> {
            Vec::new()
        }
        fn attach_carried(&mut self, _: Entity, _: Entity) {}
        fn follow_pose(&mut self, _: Entity, _: Entity) {}
        fn destroy_actor(&mut self, _: Entity) {}
        fn play_sound(&mut self, _: SoundCue, _: Vec3) {}
        fn active_camera(&self) -> Option<CameraPose> {
            None
        }
        fn line_trace(&self, _: Vec3, _: Vec3, _: f32, _: &[Entity]) -> Vec<TraceHit> {
            Vec::new()
        }
    }

    #[test]
    fn area_covers_the_portal_rectangle_only() {
        let frame = PortalFrame::new(Vec3::new(0., 1.5, -5.), Quat::IDENTITY);
        let area = DissolveArea::around(&frame, Vec2::new(0.6, 0.9), 0.1);

        assert!(dissolves(&area, frame.origin));
        assert!(dissolves(&area, Vec3::new(0.55, 2.35, -5.05)));
        assert!(!dissolves(&area, Vec3::new(0.7, 1.5, -5.)));
        assert!(!dissolves(&area, Vec3::new(0., 2.5, -5.)));
        assert!(!dissolves(&area, Vec3::new(0., 1.5, -4.8)));
    }

    #[test]
    fn turned_portal_turns_its_area() {
        let frame = PortalFrame::new(Vec3::new(10., 0., 0.), Quat::from_rotation_y(FRAC_PI_2));
        let area = DissolveArea::around(&frame, Vec2::new(0.6, 0.9), 0.1);

        // The width now runs along Z.
        assert!(dissolves(&area, Vec3::new(10., 0., 0.55)));
        assert!(!dissolves(&area, Vec3::new(10.55, 0., 0.)));
    }

    #[test]
    fn only_open_portals_dissolve_and_the_walls_follow_them() {
        let config = PortalConfig::default();
        let mut pair = PortalPair::new(&config);
        let mut world = NoActors;
        pair.link_portals(PortalKind::Blue, PortalKind::Orange).unwrap();
        let blue = PortalFrame::new(Vec3::ZERO, Quat::from_rotation_y(PI));
        pair.place(PortalKind::Blue, blue, None, &mut world);
        pair.activate(PortalKind::Blue);

        let half_size = config.portal_half_size();
        let areas = dissolve_areas(&pair, half_size, config.dissolve_half_depth);
        assert_eq!(areas, [DissolveArea::default(); 2]);

        pair.place(
            PortalKind::Orange,
            PortalFrame::new(Vec3::new(10., 0., 0.), Quat::from_rotation_y(FRAC_PI_2)),
            None,
            &mut world,
        );
        pair.activate(PortalKind::Orange);
        let areas = dissolve_areas(&pair, half_size, config.dissolve_half_depth);
        assert!(dissolves(&areas[PortalKind::Blue.index()], Vec3::ZERO));
        assert!(dissolves(&areas[PortalKind::Orange.index()], Vec3::new(10., 0., 0.)));

        let mut material = WallMaterial::new(Color::RED);
        material.set_dissolve_areas(areas);
        assert_eq!(material.dissolve_areas(), areas);

        // Moving a portal moves its area along.
        pair.place(
            PortalKind::Blue,
            PortalFrame::new(Vec3::new(0., 0., 8.), Quat::IDENTITY),
            None,
            &mut world,
        );
        let moved = dissolve_areas(&pair, half_size, config.dissolve_half_depth);
        assert_ne!(moved, material.dissolve_areas());
        assert!(!dissolves(&moved[PortalKind::Blue.index()], Vec3::ZERO));
        assert!(dissolves(&moved[PortalKind::Blue.index()], Vec3::new(0., 0., 8.)));
    }
}
