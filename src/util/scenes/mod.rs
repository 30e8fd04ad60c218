//! Test scenes built from boxes.

use std::f32::consts::FRAC_PI_2;

use bevy::prelude::*;
use bevy_rapier3d::prelude::*;

use crate::plugins::{
    physics::*,
    portal::{Portalable, WallMaterial},
};

const WALL_THICKNESS: f32 = 1.;
const CRATE_HALF_SIZE: f32 = 0.25;

/// A static box with a matching collider. Portalable slabs use a [`WallMaterial`] so that open
/// portals can cut through them.
struct Slab<M: Material> {
    name: String,
    half_extents: Vec3,
    transform: Transform,
    material: Handle<M>,
    group: Group,
    portalable: bool,
}

impl<M: Material> Slab<M> {
    fn spawn(self, commands: &mut Commands, meshes: &mut Assets<Mesh>) -> Entity {
        let mut slab = commands.spawn(MaterialMeshBundle {
            mesh: meshes.add(shape::Box::new(
                self.half_extents.x * 2.,
                self.half_extents.y * 2.,
                self.half_extents.z * 2.,
            )
            .into()),
            material: self.material,
            transform: self.transform,
            ..default()
        });
        slab.insert((
            Name::from(self.name),
            RigidBody::Fixed,
            Collider::cuboid(self.half_extents.x, self.half_extents.y, self.half_extents.z),
            CollisionGroups::new(self.group, ALL_GROUPS),
        ));
        if self.portalable {
            slab.insert(Portalable);
        }
        slab.id()
    }
}

/// Square room of side `length`: floor, ceiling and four walls that all accept portals, plus a
/// pillar in one corner which does not.
pub fn make_test_arena(
    commands: &mut Commands,
    meshes: &mut Assets<Mesh>,
    materials: &mut Assets<StandardMaterial>,
    walls: &mut Assets<WallMaterial>,
    length: f32,
    height: f32,
) {
    let half_len = length / 2.;
    let floor_half_extents = Vec3::new(half_len * 1.1, WALL_THICKNESS / 2., half_len * 1.1);
    let floor_material = walls.add(WallMaterial::new(Color::DARK_GRAY));

    Slab {
        name: "Ground".into(),
        half_extents: floor_half_extents,
        transform: Transform::from_xyz(0., -WALL_THICKNESS / 2., 0.),
        material: floor_material.clone(),
        group: GROUND_GROUP,
        portalable: true,
    }
    .spawn(commands, meshes);
    Slab {
        name: "Ceiling".into(),
        half_extents: floor_half_extents,
        transform: Transform::from_xyz(0., height + WALL_THICKNESS / 2., 0.),
        material: floor_material,
        group: GROUND_GROUP,
        portalable: true,
    }
    .spawn(commands, meshes);

    let wall_colors = [Color::RED, Color::GREEN, Color::BLUE, Color::ANTIQUE_WHITE];
    for (i, color) in wall_colors.into_iter().enumerate() {
        // Wall i faces the center of the room, turned a quarter more than wall i - 1.
        let rotation = Quat::from_rotation_y(i as f32 * FRAC_PI_2);
        let offset = rotation * Vec3::new(0., 0., -(half_len + WALL_THICKNESS / 2.));
        Slab {
            name: format!("Wall_{}", i),
            half_extents: Vec3::new(half_len, height / 2., WALL_THICKNESS / 2.),
            transform: Transform::from_translation(offset + Vec3::Y * height / 2.)
                .with_rotation(rotation),
            material: walls.add(WallMaterial::new(color)),
            group: WALLS_GROUP,
            portalable: true,
        }
        .spawn(commands, meshes);
    }

    Slab {
        name: "Pillar".into(),
        half_extents: Vec3::new(0.5, height / 2., 0.5),
        transform: Transform::from_xyz(half_len - 2., height / 2., -(half_len - 2.)),
        material: materials.add(StandardMaterial::from(Color::SILVER)),
        group: SOLID_GROUP,
        portalable: false,
    }
    .spawn(commands, meshes);
}

/// A few crates to push around, and to carry through portals.
pub fn spawn_props(
    commands: &mut Commands,
    meshes: &mut Assets<Mesh>,
    materials: &mut Assets<StandardMaterial>,
) {
    let mesh = meshes.add(shape::Cube::new(CRATE_HALF_SIZE * 2.).into());
    let material = materials.add(StandardMaterial::from(Color::BEIGE));
    let positions = [
        Vec3::new(-3., 1., -2.),
        Vec3::new(2., 1., -4.),
        Vec3::new(4., 1., 3.),
    ];
    for (i, position) in positions.into_iter().enumerate() {
        commands.spawn((
            PbrBundle {
                mesh: mesh.clone(),
                material: material.clone(),
                transform: Transform::from_translation(position),
                ..default()
            },
            Name::from(format!("Crate_{}", i)),
            RigidBody::Dynamic,
            Collider::cuboid(CRATE_HALF_SIZE, CRATE_HALF_SIZE, CRATE_HALF_SIZE),
            CollisionGroups::new(PROPS_GROUP, ALL_GROUPS),
            Velocity::default(),
            Ccd::enabled(),
        ));
    }
}
