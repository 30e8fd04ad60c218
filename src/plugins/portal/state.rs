//! The two ends of the portal link and everything that happens to actors going through them.

use bevy::{
    prelude::*,
    utils::{HashMap, HashSet},
};
use thiserror::Error;

use super::{
    capture::{capture_portal_scene, SceneCapture},
    config::PortalConfig,
    geometry::{PortalFrame, PortalMapping},
    guard::{RegistrationGuard, RegistrationLock},
    material::PortalMaterial,
    world::{Actor, ActorKind, CollisionProfile, PlayerView, PortalWorld, SoundCue},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortalKind {
    Blue,
    Orange,
}

impl PortalKind {
    pub const ALL: [PortalKind; 2] = [PortalKind::Blue, PortalKind::Orange];

    pub fn other(self) -> PortalKind {
        match self {
            PortalKind::Blue => PortalKind::Orange,
            PortalKind::Orange => PortalKind::Blue,
        }
    }

    pub fn index(self) -> usize {
        match self {
            PortalKind::Blue => 0,
            PortalKind::Orange => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PortalError {
    #[error("Cannot link the {0:?} portal to itself")]
    SelfLink(PortalKind),
    #[error("The {0:?} portal isn't linked")]
    NotLinked(PortalKind),
    #[error("The {0:?} portal render target isn't set")]
    MissingRenderTarget(PortalKind),
    #[error("The {0:?} portal recursive material isn't set")]
    MissingRecursiveMaterial(PortalKind),
}

/// One end of the link.
#[derive(Debug)]
pub struct Portal {
    kind: PortalKind,
    frame: PortalFrame,
    link: Option<PortalKind>,
    /// Scene entity carrying the portal surface and its trigger volume.
    entity: Option<Entity>,
    /// Static geometry the portal is set in.
    surface: Option<Entity>,
    stencil: u8,
    active: bool,
    /// Actors inside the trigger volume, in the order they entered.
    overlapping: Vec<Entity>,
    /// Actors that must not register as overlapping, clones mostly.
    ignored: HashSet<Entity>,
    /// Original actor to the puppet standing in for it on the other side.
    clones: HashMap<Entity, Entity>,
    lock: RegistrationLock,
    render_target: Option<Handle<Image>>,
    recursive_material: Option<Handle<PortalMaterial>>,
}

impl Portal {
    fn new(kind: PortalKind, stencil: u8) -> Portal {
        Portal {
            kind,
            frame: PortalFrame::default(),
            link: None,
            entity: None,
            surface: None,
            stencil,
            active: false,
            overlapping: Vec::new(),
            ignored: HashSet::default(),
            clones: HashMap::default(),
            lock: RegistrationLock::default(),
            render_target: None,
            recursive_material: None,
        }
    }

    pub fn kind(&self) -> PortalKind {
        self.kind
    }

    pub fn frame(&self) -> &PortalFrame {
        &self.frame
    }

    pub fn link(&self) -> Option<PortalKind> {
        self.link
    }

    pub fn entity(&self) -> Option<Entity> {
        self.entity
    }

    pub fn set_entity(&mut self, entity: Entity) {
        self.entity = Some(entity);
    }

    pub fn surface(&self) -> Option<Entity> {
        self.surface
    }

    /// Collision profile letting actors through the geometry this portal is set in.
    pub fn pass_through(&self) -> CollisionProfile {
        CollisionProfile::PassThrough {
            surface: self.surface,
        }
    }

    pub fn stencil(&self) -> u8 {
        self.stencil
    }

    pub fn set_stencil(&mut self, stencil: u8) {
        self.stencil = stencil;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn forward(&self) -> Vec3 {
        self.frame.forward()
    }

    pub fn right(&self) -> Vec3 {
        self.frame.right()
    }

    pub fn up(&self) -> Vec3 {
        self.frame.up()
    }

    pub fn overlapping(&self) -> &[Entity] {
        &self.overlapping
    }

    pub fn clone_of(&self, original: Entity) -> Option<Entity> {
        self.clones.get(&original).copied()
    }

    pub fn get_original_if_clone(&self, actor: Entity) -> Option<Entity> {
        self.clones
            .iter()
            .find_map(|(&original, &clone)| (clone == actor).then_some(original))
    }

    pub fn add_ignored_actor(&mut self, actor: Entity) {
        self.ignored.insert(actor);
    }

    pub fn remove_ignored_actor(&mut self, actor: Entity) {
        self.ignored.remove(&actor);
    }

    pub fn is_ignored(&self, actor: Entity) -> bool {
        self.ignored.contains(&actor)
    }

    pub fn registration_lock(&self) -> &RegistrationLock {
        &self.lock
    }

    pub fn render_target(&self) -> Option<&Handle<Image>> {
        self.render_target.as_ref()
    }

    pub fn set_render_target(&mut self, texture: Handle<Image>) {
        self.render_target = Some(texture);
    }

    pub fn recursive_material(&self) -> Option<&Handle<PortalMaterial>> {
        self.recursive_material.as_ref()
    }

    pub fn set_recursive_material(&mut self, material: Handle<PortalMaterial>) {
        self.recursive_material = Some(material);
    }
}

/// What happened during one portal tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub teleported: Option<Entity>,
    pub captures: usize,
}

/// Both portals. They are created once and only ever moved, activated or deactivated afterwards.
#[derive(Debug, Resource)]
pub struct PortalPair {
    portals: [Portal; 2],
    flip_angle: f32,
}

impl PortalPair {
    pub fn new(config: &PortalConfig) -> PortalPair {
        PortalPair {
            portals: [
                Portal::new(PortalKind::Blue, config.blue_stencil),
                Portal::new(PortalKind::Orange, config.orange_stencil),
            ],
            flip_angle: config.flip_angle,
        }
    }

    pub fn portal(&self, kind: PortalKind) -> &Portal {
        &self.portals[kind.index()]
    }

    pub fn portal_mut(&mut self, kind: PortalKind) -> &mut Portal {
        &mut self.portals[kind.index()]
    }

    /// The portal and the other end of the pair.
    fn pair_mut(&mut self, kind: PortalKind) -> (&mut Portal, &mut Portal) {
        let [blue, orange] = &mut self.portals;
        match kind {
            PortalKind::Blue => (blue, orange),
            PortalKind::Orange => (orange, blue),
        }
    }

    /// Which portal an entity is the scene entity of.
    pub fn kind_of(&self, entity: Entity) -> Option<PortalKind> {
        PortalKind::ALL
            .into_iter()
            .find(|&kind| self.portal(kind).entity == Some(entity))
    }

    /// Link `kind` with `target`, in both directions.
    pub fn link_portals(&mut self, kind: PortalKind, target: PortalKind) -> Result<(), PortalError> {
        if kind == target {
            return Err(PortalError::SelfLink(kind));
        }
        self.portal_mut(kind).link = Some(target);
        self.portal_mut(target).link = Some(kind);
        info!("Linked the {:?} and {:?} portals", kind, target);
        Ok(())
    }

    pub fn mapping(&self, kind: PortalKind) -> Result<PortalMapping, PortalError> {
        let this = self.portal(kind);
        let link = this.link.ok_or(PortalError::NotLinked(kind))?;
        Ok(PortalMapping::new(this.frame, self.portal(link).frame).with_flip_angle(self.flip_angle))
    }

    pub fn transform_vector_to_dest_space(
        &self,
        kind: PortalKind,
        vector: Vec3,
    ) -> Result<Vec3, PortalError> {
        Ok(self.mapping(kind)?.vector(vector))
    }

    pub fn transform_point_to_dest_space(
        &self,
        kind: PortalKind,
        point: Vec3,
    ) -> Result<Vec3, PortalError> {
        Ok(self.mapping(kind)?.point(point))
    }

    pub fn transform_quat_to_dest_space(
        &self,
        kind: PortalKind,
        quat: Quat,
    ) -> Result<Quat, PortalError> {
        Ok(self.mapping(kind)?.quat(quat))
    }

    /// Both ends are open: this portal is active and so is the portal it is linked to.
    pub fn is_open(&self, kind: PortalKind) -> bool {
        let this = self.portal(kind);
        this.active && this.link.map_or(false, |link| self.portal(link).active)
    }

    pub fn get_original_if_clone(&self, actor: Entity) -> Option<Entity> {
        self.portals
            .iter()
            .find_map(|portal| portal.get_original_if_clone(actor))
    }

    pub fn activate(&mut self, kind: PortalKind) {
        self.portal_mut(kind).active = true;
        info!("{:?} portal activated", kind);
    }

    pub fn deactivate(&mut self, kind: PortalKind, world: &mut dyn PortalWorld) {
        self.release_overlapping(kind, world);
        self.portal_mut(kind).active = false;
        info!("{:?} portal deactivated", kind);
    }

    /// Move a portal to a new spot on `surface`. Actors going through it at the old spot are let
    /// go.
    pub fn place(
        &mut self,
        kind: PortalKind,
        frame: PortalFrame,
        surface: Option<Entity>,
        world: &mut dyn PortalWorld,
    ) {
        self.release_overlapping(kind, world);
        let portal = self.portal_mut(kind);
        portal.frame = frame;
        portal.surface = surface;
        info!("{:?} portal placed at {}", kind, frame.origin);
    }

    fn release_overlapping(&mut self, kind: PortalKind, world: &mut dyn PortalWorld) {
        let (this, link) = self.pair_mut(kind);
        for actor in std::mem::take(&mut this.overlapping) {
            world.set_collision_profile(actor, CollisionProfile::Standard);
            remove_clone(this, link, actor, world);
        }
    }

    /// An actor entered the trigger volume of a portal.
    pub fn on_overlap_begin(&mut self, kind: PortalKind, actor: Entity, world: &mut dyn PortalWorld) {
        let flip_angle = self.flip_angle;
        let open = self.is_open(kind);
        let (this, link) = self.pair_mut(kind);

        if !this.active || this.lock.is_held() {
            return;
        }
        if this.ignored.contains(&actor) || this.overlapping.contains(&actor) {
            return;
        }
        if this.entity == Some(actor) || link.entity == Some(actor) {
            return;
        }
        if this.link.is_none() {
            error!("{}", PortalError::NotLinked(kind));
            return;
        }
        if !open {
            debug!("{:?} portal has no open exit, ignoring {:?}", kind, actor);
            return;
        }
        let original = match world.actor(actor) {
            Some(original) => original,
            None => {
                warn!("Overlapping actor {:?} is gone", actor);
                return;
            }
        };

        debug!("{:?} entered the {:?} portal", actor, kind);
        world.set_collision_profile(actor, this.pass_through());
        this.overlapping.push(actor);

        let mapping = PortalMapping::new(this.frame, link.frame).with_flip_angle(flip_angle);
        let clone = {
            let _guard = match RegistrationGuard::acquire([&this.lock, &link.lock]) {
                Some(guard) => guard,
                None => return,
            };
            match spawn_clone(&original, &mapping, link.pass_through(), world) {
                Some(clone) => clone,
                None => {
                    warn!("Cloning failed: {:?}", actor);
                    return;
                }
            }
        };

        this.ignored.insert(clone);
        link.ignored.insert(clone);
        this.clones.insert(actor, clone);
    }

    /// An actor left the trigger volume of a portal without going through.
    pub fn on_overlap_end(&mut self, kind: PortalKind, actor: Entity, world: &mut dyn PortalWorld) {
        let (this, link) = self.pair_mut(kind);
        if this.ignored.contains(&actor) {
            return;
        }
        let index = match this.overlapping.iter().position(|&e| e == actor) {
            Some(index) => index,
            None => return,
        };

        debug!("{:?} left the {:?} portal", actor, kind);
        world.set_collision_profile(actor, CollisionProfile::Standard);
        this.overlapping.remove(index);
        remove_clone(this, link, actor, world);
    }

    /// Per-frame update of an open portal: keep the clones in step with their originals, render
    /// the view through the portal, then send at most one actor that went through to the other
    /// side.
    pub fn tick(
        &mut self,
        kind: PortalKind,
        world: &mut dyn PortalWorld,
        capture: &mut dyn SceneCapture,
        config: &PortalConfig,
    ) -> Result<TickReport, PortalError> {
        if !self.portal(kind).active {
            return Ok(TickReport::default());
        }
        let mapping = self.mapping(kind)?;
        if !self.is_open(kind) {
            return Ok(TickReport::default());
        }

        self.sync_clones(kind, &mapping, world);
        self.sync_clones(kind.other(), &mapping.reversed(), world);

        let captures = match self.capture_scene(kind, mapping, world, capture, config) {
            Ok(captures) => captures,
            Err(e) => {
                error!("Update capture failed: {}", e);
                0
            }
        };

        let teleported = self.teleport_crossed_actor(kind, &mapping, world);
        Ok(TickReport {
            teleported,
            captures,
        })
    }

    fn sync_clones(&self, kind: PortalKind, mapping: &PortalMapping, world: &mut dyn PortalWorld) {
        for (&original, &clone) in &self.portal(kind).clones {
            let actor = match world.actor(original) {
                Some(actor) => actor,
                None => {
                    warn!("Clone {:?} lost its original {:?}", clone, original);
                    continue;
                }
            };
            pose_clone(&actor, clone, mapping, world);

            if let ActorKind::Prop = actor.kind {
                let velocity = match world.body_mut(original) {
                    Some(velocity) => *velocity,
                    None => {
                        warn!("Cannot set velocity of the clone of {:?}", original);
                        continue;
                    }
                };
                if let Some(body) = world.body_mut(clone) {
                    body.linvel = mapping.vector(velocity.linvel);
                    body.angvel = mapping.vector(velocity.angvel);
                }
            }
        }
    }

    fn capture_scene(
        &self,
        kind: PortalKind,
        mapping: PortalMapping,
        world: &dyn PortalWorld,
        capture: &mut dyn SceneCapture,
        config: &PortalConfig,
    ) -> Result<usize, PortalError> {
        let this = self.portal(kind);
        if this.render_target.is_none() {
            return Err(PortalError::MissingRenderTarget(kind));
        }
        if this.recursive_material.is_none() {
            return Err(PortalError::MissingRecursiveMaterial(kind));
        }
        match world.active_camera() {
            Some(camera) => Ok(capture_portal_scene(kind, mapping, camera, config, capture)),
            None => {
                debug!("No active camera to capture the {:?} portal from", kind);
                Ok(0)
            }
        }
    }

    fn teleport_crossed_actor(
        &mut self,
        kind: PortalKind,
        mapping: &PortalMapping,
        world: &mut dyn PortalWorld,
    ) -> Option<Entity> {
        let (this, link) = self.pair_mut(kind);

        // Only the first one goes through this tick, the others follow on the next ticks.
        let (index, actor) = this.overlapping.iter().enumerate().find_map(|(index, &entity)| {
            let actor = world.actor(entity)?;
            (!this.frame.is_in_front(actor.reference_point())).then_some((index, actor))
        })?;

        teleport_actor(&actor, mapping, world);
        this.overlapping.remove(index);
        // The actor now straddles the surface of the exit. The exit trigger volume gives it its
        // standard profile back once it is clear.
        world.set_collision_profile(actor.entity, link.pass_through());
        remove_clone(this, link, actor.entity, world);

        world.play_sound(SoundCue::PortalEnter, this.frame.origin);
        world.play_sound(SoundCue::PortalEnter, link.frame.origin);
        info!("{:?} went through the {:?} portal", actor.entity, kind);
        Some(actor.entity)
    }
}

fn spawn_clone(
    original: &Actor,
    mapping: &PortalMapping,
    profile: CollisionProfile,
    world: &mut dyn PortalWorld,
) -> Option<Entity> {
    let clone = world.duplicate_actor(original.entity)?;
    world.set_collision_profile(clone, profile);

    if let ActorKind::Player(_) = original.kind {
        for carried in world.carried_actors(original.entity) {
            match world.duplicate_actor(carried) {
                Some(carried_clone) => {
                    world.attach_carried(carried_clone, clone);
                    world.follow_pose(carried_clone, carried);
                }
                None => warn!("Cloning failed: {:?} carried by {:?}", carried, original.entity),
            }
        }
    }

    pose_clone(original, clone, mapping, world);
    Some(clone)
}

fn pose_clone(original: &Actor, clone: Entity, mapping: &PortalMapping, world: &mut dyn PortalWorld) {
    let mapped = mapping.transform(&original.transform);
    world.teleport_actor(clone, mapped.translation);
    world.set_rotation(clone, mapped.rotation);
    if let ActorKind::Player(facet) = original.kind {
        world.set_player_view(
            clone,
            PlayerView {
                look: mapping.quat(facet.look),
                movement_velocity: mapping.vector(facet.movement_velocity),
            },
        );
    }
}

fn remove_clone(this: &mut Portal, link: &mut Portal, original: Entity, world: &mut dyn PortalWorld) {
    let clone = match this.clones.remove(&original) {
        Some(clone) => clone,
        None => {
            warn!("No clone to remove for {:?}", original);
            return;
        }
    };
    for attached in world.carried_actors(clone) {
        world.destroy_actor(attached);
    }
    world.destroy_actor(clone);
    this.ignored.remove(&clone);
    link.ignored.remove(&clone);
}

fn teleport_actor(actor: &Actor, mapping: &PortalMapping, world: &mut dyn PortalWorld) {
    let mapped = mapping.transform(&actor.transform);
    world.teleport_actor(actor.entity, mapped.translation);

    match actor.kind {
        ActorKind::Player(facet) => {
            world.set_player_view(
                actor.entity,
                PlayerView {
                    look: mapping.quat(facet.look),
                    movement_velocity: mapping.vector(facet.movement_velocity),
                },
            );
            // A character stands upright whatever the portals look like.
            let (yaw, _, _) = mapped.rotation.to_euler(EulerRot::YXZ);
            world.set_rotation(actor.entity, Quat::from_rotation_y(yaw));
        }
        ActorKind::Prop => {
            world.set_rotation(actor.entity, mapped.rotation);
            match world.body_mut(actor.entity) {
                Some(velocity) => {
                    velocity.linvel = mapping.vector(velocity.linvel);
                    velocity.angvel = mapping.vector(velocity.angvel);
                }
                None => warn!("{:?} has no body to carry its velocity through", actor.entity),
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
        capture::CaptureRequest,
        clip_location::{ClipLayer, ClipRect},
        placement::TraceHit,
        world::{CameraPose, PlayerFacet},
    };

    const EYE_HEIGHT: f32 = 0.7;
    const BLUE_WALL: Entity = Entity::from_raw(900);
    const ORANGE_WALL: Entity = Entity::from_raw(901);

    #[derive(Default)]
    struct FakeWorld {
        actors: HashMap<Entity, Actor>,
        bodies: HashMap<Entity, Velocity>,
        profiles: HashMap<Entity, CollisionProfile>,
        carried: HashMap<Entity, Vec<Entity>>,
        follows: Vec<(Entity, Entity)>,
        created: Vec<Entity>,
        destroyed: Vec<Entity>,
        sounds: Vec<(SoundCue, Vec3)>,
        camera: Option<CameraPose>,
        next_id: u32,
        fail_duplicates: bool,
        watched_locks: Vec<RegistrationLock>,
        locks_held_while_duplicating: Vec<bool>,
    }

    impl FakeWorld {
        fn spawn_prop(&mut self, translation: Vec3) -> Entity {
            let entity = self.next_entity();
            self.actors.insert(
                entity,
                Actor {
                    entity,
                    transform: Transform::from_translation(translation),
                    kind: ActorKind::Prop,
                },
            );
            self.bodies.insert(entity, Velocity::default());
            entity
        }

        fn spawn_player(&mut self, translation: Vec3) -> Entity {
            let entity = self.next_entity();
            let camera = Transform::from_translation(translation + Vec3::Y * EYE_HEIGHT);
            self.actors.insert(
                entity,
                Actor {
                    entity,
                    transform: Transform::from_translation(translation),
                    kind: ActorKind::Player(PlayerFacet {
                        camera,
                        look: Quat::IDENTITY,
                        movement_velocity: Vec3::ZERO,
                    }),
                },
            );
            entity
        }

        fn next_entity(&mut self) -> Entity {
            self.next_id += 1;
            Entity::from_raw(self.next_id)
        }

        fn translation(&self, entity: Entity) -> Vec3 {
            self.actors[&entity].transform.translation
        }

        fn move_to(&mut self, entity: Entity, translation: Vec3) {
            self.teleport_actor(entity, translation);
        }
    }

    impl PortalWorld for FakeWorld {
        fn actor(&self, entity: Entity) -> Option<Actor> {
            self.actors.get(&entity).copied()
        }

        fn teleport_actor(&mut self, entity: Entity, translation: Vec3) {
            if let Some(actor) = self.actors.get_mut(&entity) {
                let delta = translation - actor.transform.translation;
                actor.transform.translation = translation;
                if let ActorKind::Player(facet) = &mut actor.kind {
                    facet.camera.translation += delta;
                }
            }
        }

        fn set_rotation(&mut self, entity: Entity, rotation: Quat) {
            if let Some(actor) = self.actors.get_mut(&entity) {
                actor.transform.rotation = rotation;
            }
        }

        fn body_mut(&mut self, entity: Entity) -> Option<&mut Velocity> {
            self.bodies.get_mut(&entity)
        }

        fn set_player_view(&mut self, entity: Entity, view: PlayerView) {
            if let Some(Actor {
                kind: ActorKind::Player(facet),
                ..
            }) = self.actors.get_mut(&entity)
            {
                facet.look = view.look;
                facet.camera.rotation = view.look;
                facet.movement_velocity = view.movement_velocity;
            }
        }

        fn set_collision_profile(&mut self, entity: Entity, profile: CollisionProfile) {
            self.profiles.insert(entity, profile);
        }

        fn duplicate_actor(&mut self, entity: Entity) -> Option<Entity> {
            let held = self.watched_locks.iter().all(RegistrationLock::is_held);
            self.locks_held_while_duplicating.push(held);
            if self.fail_duplicates {
                return None;
            }
            let mut actor = self.actors.get(&entity).copied()?;
            let clone = self.next_entity();
            actor.entity = clone;
            self.actors.insert(clone, actor);
            self.created.push(clone);
            Some(clone)
        }

        fn carried_actors(&self, holder: Entity) -> Vec<Entity> {
            self.carried.get(&holder).cloned().unwrap_or_default()
        }

        fn attach_carried(&mut self, carried: Entity, holder: Entity) {
            self.carried.entry(holder).or_default().push(carried);
        }

        fn follow_pose(&mut self, follower: Entity, leader: Entity) {
            self.follows.push((follower, leader));
        }

        fn destroy_actor(&mut self, entity: Entity) {
            self.actors.remove(&entity);
            self.destroyed.push(entity);
        }

        fn play_sound(&mut self, cue: SoundCue, location: Vec3) {
            self.sounds.push((cue, location));
        }

        fn active_camera(&self) -> Option<CameraPose> {
            self.camera
        }

        fn line_trace(&self, _: Vec3, _: Vec3, _: f32, _: &[Entity]) -> Vec<TraceHit> {
            Vec::new()
        }
    }

    #[derive(Default)]
    struct CountingCapture {
        requests: usize,
    }

    impl SceneCapture for CountingCapture {
        fn capture(&mut self, _: &CaptureRequest) {
            self.requests += 1;
        }

        fn record_clip_location(&mut self, _: PortalKind, _: ClipLayer, _: ClipRect) {}

        fn copy_to_recursive_texture(&mut self, _: PortalKind) {}
    }

    /// Blue faces +Z from the origin, orange faces -X from `(10, 0, 0)`. Both are open.
    fn open_pair() -> PortalPair {
        let config = PortalConfig::default();
        let mut pair = PortalPair::new(&config);
        pair.link_portals(PortalKind::Blue, PortalKind::Orange).unwrap();
        let mut world = FakeWorld::default();
        pair.place(
            PortalKind::Blue,
            PortalFrame::new(Vec3::ZERO, Quat::from_rotation_y(PI)),
            Some(BLUE_WALL),
            &mut world,
        );
        pair.place(
            PortalKind::Orange,
            PortalFrame::new(Vec3::new(10., 0., 0.), Quat::from_rotation_y(FRAC_PI_2)),
            Some(ORANGE_WALL),
            &mut world,
        );
        for kind in PortalKind::ALL {
            pair.activate(kind);
            let portal = pair.portal_mut(kind);
            portal.set_render_target(Handle::default());
            portal.set_recursive_material(Handle::default());
        }
        pair
    }

    fn tick(pair: &mut PortalPair, world: &mut FakeWorld) -> TickReport {
        pair.tick(
            PortalKind::Blue,
            world,
            &mut CountingCapture::default(),
            &PortalConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn linking_is_symmetric_and_rejects_self_links() {
        let mut pair = PortalPair::new(&PortalConfig::default());
        assert_eq!(
            pair.link_portals(PortalKind::Blue, PortalKind::Blue),
            Err(PortalError::SelfLink(PortalKind::Blue))
        );
        assert_eq!(pair.portal(PortalKind::Blue).link(), None);
        assert_eq!(
            pair.mapping(PortalKind::Orange),
            Err(PortalError::NotLinked(PortalKind::Orange))
        );

        pair.link_portals(PortalKind::Orange, PortalKind::Blue).unwrap();
        assert_eq!(pair.portal(PortalKind::Blue).link(), Some(PortalKind::Orange));
        assert_eq!(pair.portal(PortalKind::Orange).link(), Some(PortalKind::Blue));
    }

    #[test]
    fn stencils_come_from_config() {
        let mut pair = PortalPair::new(&PortalConfig::default());
        assert_eq!(pair.portal(PortalKind::Blue).stencil(), 1);
        assert_eq!(pair.portal(PortalKind::Orange).stencil(), 2);
        pair.portal_mut(PortalKind::Orange).set_stencil(5);
        assert_eq!(pair.portal(PortalKind::Orange).stencil(), 5);
    }

    #[test]
    fn inactive_portals_ignore_overlaps() {
        let mut pair = open_pair();
        let mut world = FakeWorld::default();
        pair.deactivate(PortalKind::Blue, &mut world);
        let prop = world.spawn_prop(Vec3::new(0., 0., 0.3));
        pair.on_overlap_begin(PortalKind::Blue, prop, &mut world);
        assert!(pair.portal(PortalKind::Blue).overlapping().is_empty());
        assert!(world.created.is_empty());

        // Nothing goes through while the exit is closed either.
        let mut pair = open_pair();
        pair.deactivate(PortalKind::Orange, &mut world);
        pair.on_overlap_begin(PortalKind::Blue, prop, &mut world);
        assert!(pair.portal(PortalKind::Blue).overlapping().is_empty());
    }

    #[test]
    fn clone_lifecycle_without_crossing() {
        let mut pair = open_pair();
        let mut world = FakeWorld::default();
        let prop = world.spawn_prop(Vec3::new(0., 0., 0.3));

        pair.on_overlap_begin(PortalKind::Blue, prop, &mut world);
        assert_eq!(world.created.len(), 1);
        let clone = world.created[0];
        assert_eq!(pair.portal(PortalKind::Blue).clone_of(prop), Some(clone));
        assert_eq!(pair.get_original_if_clone(clone), Some(prop));
        assert!(pair.portal(PortalKind::Blue).is_ignored(clone));
        assert!(pair.portal(PortalKind::Orange).is_ignored(clone));
        assert_eq!(
            world.profiles[&prop],
            CollisionProfile::PassThrough {
                surface: Some(BLUE_WALL)
            }
        );
        assert_eq!(
            world.profiles[&clone],
            CollisionProfile::PassThrough {
                surface: Some(ORANGE_WALL)
            }
        );

        // The clone stands on the other side of the link.
        let expected = pair
            .transform_point_to_dest_space(PortalKind::Blue, Vec3::new(0., 0., 0.3))
            .unwrap();
        assert!(world.translation(clone).abs_diff_eq(expected, 1e-4));

        // Entering twice, or the clone entering, changes nothing.
        pair.on_overlap_begin(PortalKind::Blue, prop, &mut world);
        pair.on_overlap_begin(PortalKind::Orange, clone, &mut world);
        assert_eq!(world.created.len(), 1);

        world.move_to(prop, Vec3::new(0., 0., 0.5));
        assert_eq!(tick(&mut pair, &mut world).teleported, None);

        pair.on_overlap_end(PortalKind::Blue, prop, &mut world);
        assert_eq!(world.destroyed, vec![clone]);
        assert_eq!(world.profiles[&prop], CollisionProfile::Standard);
        assert!(pair.portal(PortalKind::Blue).overlapping().is_empty());
        assert!(!pair.portal(PortalKind::Orange).is_ignored(clone));
        assert!(world.sounds.is_empty());
    }

    #[test]
    fn one_teleport_per_tick() {
        let mut pair = open_pair();
        let mut world = FakeWorld::default();
        let props: Vec<_> = (0..3)
            .map(|i| world.spawn_prop(Vec3::new(i as f32 * 0.2 - 0.2, 0., 0.3)))
            .collect();
        for &prop in &props {
            pair.on_overlap_begin(PortalKind::Blue, prop, &mut world);
        }
        for &prop in &props {
            let at = world.translation(prop);
            world.move_to(prop, Vec3::new(at.x, at.y, -0.1));
        }

        let mut teleported = Vec::new();
        for _ in 0..3 {
            let report = tick(&mut pair, &mut world);
            teleported.push(report.teleported.unwrap());
        }
        assert_eq!(teleported, props);
        assert_eq!(tick(&mut pair, &mut world).teleported, None);

        let orange = *pair.portal(PortalKind::Orange).frame();
        for prop in props {
            assert!(orange.is_in_front(world.translation(prop)));
            assert_eq!(
                world.profiles[&prop],
                CollisionProfile::PassThrough {
                    surface: Some(ORANGE_WALL)
                }
            );
        }
        assert_eq!(world.destroyed.len(), 3);
        assert_eq!(world.sounds.len(), 6);
    }

    #[test]
    fn teleported_actor_passes_through_the_exit_until_clear() {
        let mut pair = open_pair();
        let mut world = FakeWorld::default();
        let prop = world.spawn_prop(Vec3::new(0., 0., 0.3));
        pair.on_overlap_begin(PortalKind::Blue, prop, &mut world);
        world.move_to(prop, Vec3::new(0., 0., -0.1));
        assert_eq!(tick(&mut pair, &mut world).teleported, Some(prop));

        let exit = CollisionProfile::PassThrough {
            surface: Some(ORANGE_WALL),
        };
        assert_eq!(world.profiles[&prop], exit);

        // Leaving the entrance volume it is no longer tracked by does not restore the profile.
        pair.on_overlap_end(PortalKind::Blue, prop, &mut world);
        assert_eq!(world.profiles[&prop], exit);

        // The exit volume takes over, and only clearing it restores the profile.
        pair.on_overlap_begin(PortalKind::Orange, prop, &mut world);
        assert_eq!(world.profiles[&prop], exit);
        assert_eq!(pair.portal(PortalKind::Orange).overlapping(), &[prop]);
        world.move_to(prop, Vec3::new(9.5, 0., 0.));
        pair.on_overlap_end(PortalKind::Orange, prop, &mut world);
        assert_eq!(world.profiles[&prop], CollisionProfile::Standard);
    }

    #[test]
    fn velocity_is_carried_through() {
        let mut pair = open_pair();
        let mut world = FakeWorld::default();
        let prop = world.spawn_prop(Vec3::new(0., 0., 0.3));
        pair.on_overlap_begin(PortalKind::Blue, prop, &mut world);

        world.move_to(prop, Vec3::new(0., 0., -0.1));
        world.bodies.insert(
            prop,
            Velocity {
                linvel: Vec3::new(0., 0., -4.),
                angvel: Vec3::Y,
            },
        );
        assert_eq!(tick(&mut pair, &mut world).teleported, Some(prop));

        // Into blue along -Z, out of orange along its normal, -X.
        let velocity = world.bodies[&prop];
        assert!(velocity.linvel.abs_diff_eq(Vec3::new(-4., 0., 0.), 1e-4));
        assert!(velocity.angvel.abs_diff_eq(Vec3::Y, 1e-4));
    }

    #[test]
    fn player_keeps_upright_and_looks_out_of_the_exit() {
        let mut pair = open_pair();
        let mut world = FakeWorld::default();
        let player = world.spawn_player(Vec3::new(0., -0.7, 0.5));
        pair.on_overlap_begin(PortalKind::Blue, player, &mut world);

        // Walk into blue, looking at it.
        world.move_to(player, Vec3::new(0., -0.7, -0.1));
        if let Some(Actor {
            kind: ActorKind::Player(facet),
            ..
        }) = world.actors.get_mut(&player)
        {
            facet.movement_velocity = Vec3::new(0., 0., -3.);
            facet.look = Quat::from_rotation_x(-0.3);
        }
        world.set_rotation(player, Quat::from_rotation_z(0.2));

        assert_eq!(tick(&mut pair, &mut world).teleported, Some(player));

        let actor = world.actors[&player];
        let up = actor.transform.rotation * Vec3::Y;
        assert!(up.abs_diff_eq(Vec3::Y, 1e-4));
        match actor.kind {
            ActorKind::Player(facet) => {
                assert!(facet.movement_velocity.abs_diff_eq(Vec3::new(-3., 0., 0.), 1e-4));
                let look = facet.look * Vec3::NEG_Z;
                assert!(look.x < -0.9);
            }
            ActorKind::Prop => panic!("player turned into a prop"),
        }
    }

    #[test]
    fn player_clone_carries_copies_of_held_items() {
        let mut pair = open_pair();
        let mut world = FakeWorld::default();
        let player = world.spawn_player(Vec3::new(0., -0.7, 0.5));
        let gun = world.spawn_prop(Vec3::new(0.3, 0., 0.2));
        world.carried.insert(player, vec![gun]);

        pair.on_overlap_begin(PortalKind::Blue, player, &mut world);
        assert_eq!(world.created.len(), 2);
        let clone = pair.portal(PortalKind::Blue).clone_of(player).unwrap();
        let gun_clone = world.carried[&clone][0];
        assert_eq!(world.follows, vec![(gun_clone, gun)]);

        pair.on_overlap_end(PortalKind::Blue, player, &mut world);
        assert!(world.destroyed.contains(&clone));
        assert!(world.destroyed.contains(&gun_clone));
    }

    #[test]
    fn registration_is_locked_while_cloning() {
        let mut pair = open_pair();
        let mut world = FakeWorld::default();
        world.watched_locks = PortalKind::ALL
            .iter()
            .map(|&kind| pair.portal(kind).registration_lock().clone())
            .collect();
        let prop = world.spawn_prop(Vec3::new(0., 0., 0.3));

        pair.on_overlap_begin(PortalKind::Blue, prop, &mut world);
        assert_eq!(world.locks_held_while_duplicating, vec![true]);
        assert!(world.watched_locks.iter().all(|lock| !lock.is_held()));

        // A failed clone releases the locks too.
        world.fail_duplicates = true;
        let other = world.spawn_prop(Vec3::new(0.2, 0., 0.3));
        pair.on_overlap_begin(PortalKind::Blue, other, &mut world);
        assert_eq!(world.locks_held_while_duplicating, vec![true, true]);
        assert!(world.watched_locks.iter().all(|lock| !lock.is_held()));
        assert_eq!(pair.portal(PortalKind::Blue).clone_of(other), None);

        // Overlaps reported while a lock is held are dropped.
        let guard = RegistrationGuard::acquire([pair.portal(PortalKind::Orange).registration_lock()]);
        let third = world.spawn_prop(Vec3::new(10.3, 0., 0.));
        pair.on_overlap_begin(PortalKind::Orange, third, &mut world);
        assert!(pair.portal(PortalKind::Orange).overlapping().is_empty());
        drop(guard);
    }

    #[test]
    fn missing_render_target_only_skips_the_capture() {
        let mut pair = PortalPair::new(&PortalConfig::default());
        let mut world = FakeWorld::default();
        pair.link_portals(PortalKind::Blue, PortalKind::Orange).unwrap();
        pair.place(
            PortalKind::Blue,
            PortalFrame::new(Vec3::ZERO, Quat::from_rotation_y(PI)),
            None,
            &mut world,
        );
        pair.place(
            PortalKind::Orange,
            PortalFrame::new(Vec3::new(0., 0., 10.), Quat::IDENTITY),
            None,
            &mut world,
        );
        pair.activate(PortalKind::Blue);
        pair.activate(PortalKind::Orange);
        world.camera = Some(CameraPose {
            transform: Transform::from_xyz(0., 0., 5.).looking_at(Vec3::ZERO, Vec3::Y),
            projection: Mat4::perspective_infinite_reverse_rh(0.8, 16. / 9., 0.1),
        });

        let prop = world.spawn_prop(Vec3::new(0., 0., 0.3));
        pair.on_overlap_begin(PortalKind::Blue, prop, &mut world);
        world.move_to(prop, Vec3::new(0., 0., -0.1));

        let report = tick(&mut pair, &mut world);
        assert_eq!(report, TickReport { teleported: Some(prop), captures: 0 });

        pair.portal_mut(PortalKind::Blue).set_render_target(Handle::default());
        pair.portal_mut(PortalKind::Blue).set_recursive_material(Handle::default());
        assert_eq!(tick(&mut pair, &mut world).captures, 2);
    }

    #[test]
    fn replacing_a_portal_lets_go_of_its_actors() {
        let mut pair = open_pair();
        let mut world = FakeWorld::default();
        let prop = world.spawn_prop(Vec3::new(0., 0., 0.3));
        pair.on_overlap_begin(PortalKind::Blue, prop, &mut world);
        let clone = pair.portal(PortalKind::Blue).clone_of(prop).unwrap();

        pair.place(
            PortalKind::Blue,
            PortalFrame::new(Vec3::new(0., 0., 20.), Quat::IDENTITY),
            None,
            &mut world,
        );
        assert!(pair.portal(PortalKind::Blue).overlapping().is_empty());
        assert_eq!(pair.portal(PortalKind::Blue).surface(), None);
        assert_eq!(world.destroyed, vec![clone]);
        assert_eq!(world.profiles[&prop], CollisionProfile::Standard);
    }

    #[test]
    fn unlinked_tick_is_an_error() {
        let mut pair = PortalPair::new(&PortalConfig::default());
        pair.activate(PortalKind::Blue);
        let result = pair.tick(
            PortalKind::Blue,
            &mut FakeWorld::default(),
            &mut CountingCapture::default(),
            &PortalConfig::default(),
        );
        assert_eq!(result, Err(PortalError::NotLinked(PortalKind::Blue)));
    }
}
