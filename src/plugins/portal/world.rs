//! The slice of the game world the portals are allowed to touch.
//!
//! Portals never reach for global state: everything they read or change about other actors goes
//! through a [`PortalWorld`] handed to them for the duration of a call.

use bevy::prelude::*;
use bevy_rapier3d::prelude::Velocity;

use super::placement::TraceHit;

/// Facet of an actor driven by a first person controller. The look direction of such an actor is
/// decoupled from the rotation of its body.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerFacet {
    /// World pose of the first person camera.
    pub camera: Transform,
    /// World rotation the controller is looking with.
    pub look: Quat,
    pub movement_velocity: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActorKind {
    Prop,
    Player(PlayerFacet),
}

/// Snapshot of an actor taken at the start of an operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Actor {
    pub entity: Entity,
    pub transform: Transform,
    pub kind: ActorKind,
}

impl Actor {
    /// The point that decides which side of a portal the actor is on: the eyes for players, the
    /// origin for everything else.
    pub fn reference_point(&self) -> Vec3 {
        match self.kind {
            ActorKind::Player(facet) => facet.camera.translation,
            ActorKind::Prop => self.transform.translation,
        }
    }
}

/// New look state of a player-controlled actor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerView {
    pub look: Quat,
    pub movement_velocity: Vec3,
}

/// Collision setup of a shape near a portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionProfile {
    Standard,
    /// Lets the shape overlap `surface`, the geometry a portal is set in, instead of being blocked
    /// by it.
    PassThrough { surface: Option<Entity> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundCue {
    PortalEnter,
    PortalOpen,
    PortalInvalidSurface,
}

/// Pose and lens of the camera the game is viewed through.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub transform: Transform,
    pub projection: Mat4,
}

impl CameraPose {
    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.transform.compute_matrix().inverse()
    }
}

pub trait PortalWorld {
    fn actor(&self, entity: Entity) -> Option<Actor>;

    /// Move an actor without sweeping, so that no collision response is triggered on the way.
    fn teleport_actor(&mut self, entity: Entity, translation: Vec3);

    fn set_rotation(&mut self, entity: Entity, rotation: Quat);

    /// The physics body of an actor, when it has one.
    fn body_mut(&mut self, entity: Entity) -> Option<&mut Velocity>;

    fn set_player_view(&mut self, entity: Entity, view: PlayerView);

    fn set_collision_profile(&mut self, entity: Entity, profile: CollisionProfile);

    /// Spawn a non interactive copy of an actor at the same place.
    fn duplicate_actor(&mut self, entity: Entity) -> Option<Entity>;

    /// Actors rigidly carried by `holder`.
    fn carried_actors(&self, holder: Entity) -> Vec<Entity>;

    /// Attach `carried` to the grip of `holder`.
    fn attach_carried(&mut self, carried: Entity, holder: Entity);

    /// Keep `follower` posed like `leader` from now on.
    fn follow_pose(&mut self, follower: Entity, leader: Entity);

    fn destroy_actor(&mut self, entity: Entity);

    fn play_sound(&mut self, cue: SoundCue, location: Vec3);

    fn active_camera(&self) -> Option<CameraPose>;

    /// Blocking hits along a line, nearest first.
    fn line_trace(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        ignore: &[Entity],
    ) -> Vec<TraceHit>;
}
