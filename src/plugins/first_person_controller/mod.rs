//! First person controller: a capsule body walking on the XZ plane, with the view pitched on a
//! child anchor so the body itself stays upright. The controller carries the portal gun.
//!
//! Missing controls: jumping and crouching.

use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

use bevy::{prelude::*, reflect::FromReflect, render::camera::Projection};
use bevy_rapier3d::prelude::*;
use euclid::Angle;
use leafwing_input_manager::prelude::*;

use crate::plugins::{
    input::{default_input_map, Actions},
    physics::*,
    portal::CarriedItems,
};

const PLAYER_HEIGHT: f32 = 1.8;
const PLAYER_RADIUS: f32 = 0.4;
/// Half length of the capsule segment, the caps making up the rest of the height.
const CAPSULE_HALF_SEGMENT: f32 = PLAYER_HEIGHT / 2. - PLAYER_RADIUS;
const EYE_HEIGHT: f32 = 1.25;
const GUN_OFFSET: Vec3 = Vec3::new(0.25, -0.2, -0.45);

#[derive(Debug)]
pub struct FirstPersonControllerPlugin;

impl Plugin for FirstPersonControllerPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<ControllerSettings>()
            .add_system(spawn_controller.label(FirstPersonLabels::SpawnControllers))
            .add_system(
                move_controller
                    .label(FirstPersonLabels::ProcessInputs)
                    .after(FirstPersonLabels::SpawnControllers),
            );
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, SystemLabel)]
pub enum FirstPersonLabels {
    SpawnControllers,
    ProcessInputs,
}

/// Tuning of every first person controller.
#[derive(Debug, Clone, Resource)]
pub struct ControllerSettings {
    /// Walking speed, in m/s.
    pub speed: f32,
    pub sprint_multiplier: f32,
    /// Radians per pixel of mouse motion.
    pub mouse_sensitivity: f32,
    /// Vertical field of view of the player camera.
    pub fov: f32,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        ControllerSettings {
            speed: 3.,
            sprint_multiplier: 2.,
            mouse_sensitivity: 0.004,
            fov: FRAC_PI_4,
        }
    }
}

/// Yaw and pitch of the view, and the entity the pitch is applied to.
#[derive(Debug, Component)]
pub struct FirstPersonController {
    pub theta: Angle<f32>,
    pub phi: Angle<f32>,
    pub camera_anchor: Entity,
}

#[derive(Debug, Default, Component, Reflect, FromReflect)]
#[reflect(Component)]
pub struct FirstPersonCamera;

/// Replaced by a complete controller on the next frame.
#[derive(Debug, Component, Default, Reflect, FromReflect)]
#[reflect(Component)]
pub struct FirstPersonControllerSpawner;

#[derive(Debug, Bundle, Default)]
pub struct FirstPersonControllerBundle {
    #[bundle]
    pub spatial: SpatialBundle,
    pub spawner: FirstPersonControllerSpawner,
}

fn spawn_controller(
    mut commands: Commands,
    spawners: Query<Entity, With<FirstPersonControllerSpawner>>,
    settings: Res<ControllerSettings>,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<StandardMaterial>>,
) {
    for player in &spawners {
        let gun = commands
            .spawn(PbrBundle {
                mesh: meshes.add(shape::Box::new(0.08, 0.1, 0.4).into()),
                material: materials.add(StandardMaterial::from(Color::GRAY)),
                transform: Transform::from_translation(GUN_OFFSET),
                ..default()
            })
            .insert(Name::from("Portal gun"))
            .id();

        let camera = commands
            .spawn(Camera3dBundle {
                projection: Projection::Perspective(PerspectiveProjection {
                    fov: settings.fov,
                    aspect_ratio: 16. / 9.,
                    near: 0.1,
                    far: 1000.,
                }),
                ..default()
            })
            .insert((Name::from("Player camera"), FirstPersonCamera))
            .add_child(gun)
            .id();

        let camera_anchor = commands
            .spawn(SpatialBundle::from_transform(Transform::from_xyz(
                0.,
                EYE_HEIGHT - PLAYER_HEIGHT / 2.,
                0.,
            )))
            .insert(Name::from("Camera anchor"))
            .add_child(camera)
            .id();

        commands
            .entity(player)
            .remove::<FirstPersonControllerSpawner>()
            .insert(InputManagerBundle {
                action_state: ActionState::default(),
                input_map: default_input_map(),
            })
            .insert((
                RigidBody::Dynamic,
                Collider::capsule_y(CAPSULE_HALF_SEGMENT, PLAYER_RADIUS),
                LockedAxes::ROTATION_LOCKED_X | LockedAxes::ROTATION_LOCKED_Z,
                Velocity::default(),
                CollisionGroups::new(PLAYER_GROUP, ALL_GROUPS),
                Name::from("Player"),
                FirstPersonController {
                    theta: Angle::zero(),
                    phi: Angle::zero(),
                    camera_anchor,
                },
                CarriedItems(vec![gun]),
            ))
            .add_child(camera_anchor);
        debug!("Spawned first person controller {:?}", player);
    }
}

/// -1, 0 or 1 depending on which of the two opposite actions is held.
fn axis(state: &ActionState<Actions>, positive: Actions, negative: Actions) -> f32 {
    match (state.pressed(positive), state.pressed(negative)) {
        (true, false) => 1.,
        (false, true) => -1.,
        _ => 0.,
    }
}

/// Horizontal velocity the inputs ask for, given the body orientation.
fn walk_velocity(
    state: &ActionState<Actions>,
    rotation: Quat,
    settings: &ControllerSettings,
) -> Vec3 {
    let forward = rotation * Vec3::NEG_Z;
    let right = rotation * Vec3::X;
    let intent = forward * axis(state, Actions::Forward, Actions::Backwards)
        + right * axis(state, Actions::StrafeRight, Actions::StrafeLeft);
    let horizontal = Vec3::new(intent.x, 0., intent.z).normalize_or_zero();
    let speed = if state.pressed(Actions::Sprint) {
        settings.speed * settings.sprint_multiplier
    } else {
        settings.speed
    };
    horizontal * speed
}

fn move_controller(
    settings: Res<ControllerSettings>,
    time: Res<Time>,
    mut players: Query<(
        &ActionState<Actions>,
        &mut FirstPersonController,
        &mut Velocity,
        &Transform,
    )>,
    mut anchors: Query<&mut Transform, Without<FirstPersonController>>,
) {
    for (state, mut controller, mut velocity, transform) in &mut players {
        // Gravity keeps acting on the vertical component.
        velocity.linvel = walk_velocity(state, transform.rotation, &settings)
            + Vec3::Y * velocity.linvel.y;

        // Yaw turns the body through its angular velocity so the physics engine stays in charge
        // of its orientation. Pitch only turns the camera anchor.
        let motion = state.axis_pair(Actions::Aim).map_or(Vec2::ZERO, |pair| pair.xy());
        let yaw = -motion.x * settings.mouse_sensitivity;
        controller.theta += Angle::radians(yaw);
        controller.phi += Angle::radians(motion.y * settings.mouse_sensitivity);
        controller.phi.radians = controller.phi.radians.clamp(-FRAC_PI_2, FRAC_PI_2);

        let delta = time.delta_seconds();
        velocity.angvel.y = if delta > 0. { yaw / delta } else { 0. };

        if let Ok(mut anchor) = anchors.get_mut(controller.camera_anchor) {
            anchor.rotation = Quat::from_rotation_x(-controller.phi.radians);
        }
    }
}
