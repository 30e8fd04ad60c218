//! Portal plugin: a pair of linked portals that actors can walk through and see through.
//!
//! The simulation itself lives in [`state`] and only talks to the game through the
//! [`world::PortalWorld`] and [`capture::SceneCapture`] traits. This module implements both over
//! the ECS world and schedules the per-frame update.

use std::path::Path;

use bevy::{
    ecs::event::Events,
    hierarchy::despawn_with_children_recursive,
    prelude::*,
    render::{
        camera::{CameraProjection, CameraProjectionPlugin, Projection, RenderTarget},
        primitives::Aabb,
        render_resource::{
            Extent3d, TextureDescriptor, TextureDimension, TextureFormat, TextureUsages,
        },
        view::{Layer, RenderLayers},
    },
    transform::TransformSystem,
    utils::HashSet,
};
use bevy_rapier3d::prelude::*;
use euclid::Angle;

pub mod camera_projection;
pub mod capture;
pub mod clip_location;
pub mod config;
pub mod dissolve;
pub mod geometry;
pub mod guard;
pub mod material;
pub mod placement;
pub mod state;
pub mod world;

pub use camera_projection::PortalCameraProjection;
pub use capture::{CaptureRequest, SceneCapture};
pub use clip_location::{ClipLayer, ClipLocations, ClipRect};
pub use config::{PortalConfig, DEFAULT_CONFIG_PATH};
pub use dissolve::WallMaterial;
pub use geometry::{PortalFrame, PortalMapping};
pub use material::PortalMaterial;
pub use placement::{Bounds, SurfaceKind, TraceHit};
pub use state::{PortalError, PortalKind, PortalPair};
pub use world::{
    Actor, ActorKind, CameraPose, CollisionProfile, PlayerFacet, PlayerView, PortalWorld, SoundCue,
};

use camera_projection::view_space_plane;

use super::{
    first_person_controller::{FirstPersonCamera, FirstPersonController},
    physics::*,
};

/// Layer of the portal surfaces seen by the game camera.
const PORTAL_LAYER: Layer = 1;
/// Deepest recursion the render setup can hold. Each level of each portal needs its own layer.
const MAX_LEVELS: usize = 8;
const CAPTURE_PRIORITY: isize = -100;
const RENDER_TARGET_SIZE: Extent3d = Extent3d {
    width: 1280,
    height: 720,
    depth_or_array_layers: 1,
};
/// Depth of the trigger volume on each side of the portal plane.
const SENSOR_HALF_DEPTH: f32 = 0.6;
const SOUNDS_DIR: &str = "assets";

#[derive(Debug)]
pub struct PortalPlugin;

#[derive(Debug, Clone, PartialEq, Eq, Hash, SystemLabel)]
pub enum PortalLabels {
    UpdateMainCamera,
    RouteCollisions,
    Tick,
}

/// Scene entity of a portal.
#[derive(Debug, Clone, Copy, Component)]
pub struct PortalSurface(pub PortalKind);

/// Marks static geometry which accepts portals.
#[derive(Debug, Default, Clone, Copy, Component, Reflect)]
#[reflect(Component)]
pub struct Portalable;

/// Copy of an actor standing at the other end of a portal.
#[derive(Debug, Clone, Copy, Component)]
pub struct PortalClone {
    pub original: Entity,
}

/// Actors rigidly carried by this one, which travel along when it is cloned.
#[derive(Debug, Default, Clone, Component)]
pub struct CarriedItems(pub Vec<Entity>);

/// Keeps this entity posed relative to its parent like `leader` is relative to `leader_holder`.
#[derive(Debug, Clone, Copy, Component)]
pub struct PoseFollower {
    pub leader: Entity,
    pub leader_holder: Entity,
}

#[derive(Debug, Clone, Copy, Component)]
pub struct CaptureCamera {
    pub portal: PortalKind,
    pub level: usize,
}

/// The camera the game is viewed through, and the player it belongs to.
#[derive(Debug, Clone, Copy, Resource)]
pub struct MainCamera {
    pub camera: Entity,
    pub player: Entity,
}

/// An actor went through a portal this frame.
#[derive(Debug, Clone, Copy)]
pub struct ActorPassedPortal {
    pub portal: PortalKind,
    pub actor: Entity,
}

/// An actor started or stopped touching the trigger volume of a portal.
#[derive(Debug, Clone, Copy)]
pub struct PortalOverlap {
    pub portal: PortalKind,
    pub actor: Entity,
    pub begin: bool,
}

#[derive(Debug, Default, Resource)]
pub struct PortalSounds {
    enter: Option<Handle<AudioSource>>,
    open: Option<Handle<AudioSource>>,
    invalid_surface: Option<Handle<AudioSource>>,
}

impl PortalSounds {
    fn get(&self, cue: SoundCue) -> Option<&Handle<AudioSource>> {
        match cue {
            SoundCue::PortalEnter => self.enter.as_ref(),
            SoundCue::PortalOpen => self.open.as_ref(),
            SoundCue::PortalInvalidSurface => self.invalid_surface.as_ref(),
        }
    }
}

/// Render resources of one portal: one capture camera and image per recursion level, plus the
/// image holding last frame's deepest capture.
#[derive(Debug, Clone)]
struct PortalRig {
    /// Indexed by level - 1, the deepest level first.
    cameras: Vec<Entity>,
    textures: Vec<Handle<Image>>,
    recursive_texture: Handle<Image>,
    /// Drawn on the portal as seen by the capture camera of the same level.
    proxy_materials: Vec<Handle<PortalMaterial>>,
    main_material: Handle<PortalMaterial>,
}

#[derive(Debug, Resource)]
struct CaptureRig {
    portals: Vec<PortalRig>,
}

impl Plugin for PortalPlugin {
    fn build(&self, app: &mut App) {
        if !app.world.contains_resource::<PortalConfig>() {
            app.insert_resource(PortalConfig::load_or_default(DEFAULT_CONFIG_PATH));
        }
        let pair = PortalPair::new(app.world.resource::<PortalConfig>());

        app.add_plugin(MaterialPlugin::<PortalMaterial>::default())
            .add_plugin(MaterialPlugin::<WallMaterial>::default())
            .add_plugin(CameraProjectionPlugin::<PortalCameraProjection>::default())
            .register_type::<Portalable>()
            .register_type::<PortalCameraProjection>()
            .insert_resource(pair)
            .add_event::<PortalOverlap>()
            .add_event::<ActorPassedPortal>()
            .add_startup_system(spawn_portals)
            .add_startup_system(load_portal_sounds)
            .add_system(update_main_camera.label(PortalLabels::UpdateMainCamera))
            .add_system(route_portal_collisions.label(PortalLabels::RouteCollisions))
            .add_system(
                tick_portals
                    .label(PortalLabels::Tick)
                    .after(PortalLabels::UpdateMainCamera)
                    .after(PortalLabels::RouteCollisions),
            )
            .add_system(follow_poses.after(PortalLabels::Tick))
            .add_system(dissolve::update_wall_dissolve.after(PortalLabels::Tick))
            .add_system_to_stage(
                CoreStage::PostUpdate,
                bevy::render::view::update_frusta::<PortalCameraProjection>
                    .after(TransformSystem::TransformPropagate),
            );
    }
}

fn portal_tint(kind: PortalKind) -> Color {
    match kind {
        PortalKind::Blue => Color::rgb(0.1, 0.4, 1.),
        PortalKind::Orange => Color::rgb(1., 0.5, 0.),
    }
}

/// Render layers of the capture cameras of one portal, one per recursion level. Each stencil value
/// owns its own run of `MAX_LEVELS` layers after the game layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CaptureLayers {
    first: Layer,
}

impl CaptureLayers {
    fn for_stencil(stencil: u8) -> Option<CaptureLayers> {
        let slot = (stencil as usize).checked_sub(1)?;
        let first = 2 + slot * MAX_LEVELS;
        (first + MAX_LEVELS <= RenderLayers::TOTAL_LAYERS).then_some(CaptureLayers {
            first: first as Layer,
        })
    }

    /// Layer holding the portal surfaces seen by the capture camera of `level`, 1 being the
    /// deepest.
    fn layer(self, level: usize) -> Layer {
        self.first + (level.clamp(1, MAX_LEVELS) - 1) as Layer
    }
}

/// Capture layers of both portals, from their stencils. A stencil without layers to spare, or one
/// already taken by the other portal, is replaced with the first free one.
fn capture_layers(pair: &PortalPair) -> [CaptureLayers; 2] {
    let mut taken: Vec<u8> = Vec::new();
    PortalKind::ALL.map(|kind| {
        let wanted = pair.portal(kind).stencil();
        let stencil = if CaptureLayers::for_stencil(wanted).is_some() && !taken.contains(&wanted) {
            wanted
        } else {
            let free = (1..=u8::MAX)
                .find(|s| CaptureLayers::for_stencil(*s).is_some() && !taken.contains(s))
                .unwrap_or(kind.index() as u8 + 1);
            warn!(
                "{:?} portal stencil {} has no free render layers, using {}",
                kind, wanted, free
            );
            free
        };
        taken.push(stencil);
        CaptureLayers::for_stencil(stencil).unwrap_or(CaptureLayers {
            first: (2 + kind.index() * MAX_LEVELS) as Layer,
        })
    })
}

fn render_target_image() -> Image {
    let mut image = Image {
        texture_descriptor: TextureDescriptor {
            label: None,
            size: RENDER_TARGET_SIZE,
            mip_level_count: 1,
            sample_count: 1,
            dimension: TextureDimension::D2,
            format: TextureFormat::Bgra8UnormSrgb,
            usage: TextureUsages::TEXTURE_BINDING
                | TextureUsages::COPY_DST
                | TextureUsages::RENDER_ATTACHMENT,
        },
        ..default()
    };
    image.resize(RENDER_TARGET_SIZE);
    image
}

fn spawn_capture_camera(
    commands: &mut Commands,
    kind: PortalKind,
    level: usize,
    layer: Layer,
    target: Handle<Image>,
) -> Entity {
    commands
        .spawn(Camera3dBundle {
            camera: Camera {
                // Deepest levels render first, all of them before the game camera.
                priority: CAPTURE_PRIORITY + (level * 2 + kind.index()) as isize,
                is_active: false,
                target: RenderTarget::Image(target),
                ..default()
            },
            ..default()
        })
        .remove::<Projection>()
        .insert((
            PortalCameraProjection::default(),
            CaptureCamera {
                portal: kind,
                level,
            },
            RenderLayers::layer(0).with(layer),
            Name::from(format!("{:?} capture camera {}", kind, level)),
        ))
        .id()
}

/// Spawn both portals, closed, along with everything needed to render them.
fn spawn_portals(
    mut commands: Commands,
    mut meshes: ResMut<Assets<Mesh>>,
    mut materials: ResMut<Assets<PortalMaterial>>,
    mut images: ResMut<Assets<Image>>,
    mut pair: ResMut<PortalPair>,
    config: Res<PortalConfig>,
) {
    let half_size = config.portal_half_size();
    let mesh = meshes.add(
        shape::Quad {
            size: half_size * 2.,
            flip: false,
        }
        .into(),
    );
    // The portal plane sits slightly inside the wall, its surface slightly outside.
    let surface_transform = Transform::from_translation(Vec3::NEG_Z * config.wall_offset * 2.);
    let levels = (config.max_recursion as usize).clamp(1, MAX_LEVELS);
    if levels != config.max_recursion as usize {
        warn!(
            "Portal recursion depth {} clamped to {}",
            config.max_recursion, levels
        );
    }

    let layers = capture_layers(&pair);
    let mut rigs = Vec::new();
    for kind in PortalKind::ALL {
        let tint = portal_tint(kind);
        let layers = layers[kind.index()];
        let recursive_texture = images.add(render_target_image());
        let textures: Vec<_> = (0..levels)
            .map(|_| images.add(render_target_image()))
            .collect();
        let cameras: Vec<_> = (1..=levels)
            .map(|level| {
                let target = textures[level - 1].clone();
                spawn_capture_camera(&mut commands, kind, level, layers.layer(level), target)
            })
            .collect();
        let proxy_materials: Vec<_> = (1..=levels)
            .map(|level| {
                if level == 1 {
                    materials.add(PortalMaterial::recursive(recursive_texture.clone(), tint))
                } else {
                    materials.add(PortalMaterial::new(textures[level - 2].clone(), tint))
                }
            })
            .collect();
        let main_material = materials.add(PortalMaterial::new(textures[levels - 1].clone(), tint));

        let entity = commands
            .spawn(SpatialBundle {
                visibility: Visibility { is_visible: false },
                transform: pair.portal(kind).frame().transform(),
                ..default()
            })
            .insert((
                Collider::cuboid(half_size.x, half_size.y, SENSOR_HALF_DEPTH),
                Sensor,
                ActiveEvents::COLLISION_EVENTS,
                CollisionGroups::new(PORTAL_GROUP, PLAYER_GROUP | PROPS_GROUP),
                PortalSurface(kind),
                Name::from(format!("{:?} portal", kind)),
            ))
            .with_children(|parent| {
                parent.spawn((
                    MaterialMeshBundle {
                        mesh: mesh.clone(),
                        material: main_material.clone(),
                        transform: surface_transform,
                        ..default()
                    },
                    RenderLayers::layer(PORTAL_LAYER),
                    Name::from("Surface"),
                ));
                for (i, material) in proxy_materials.iter().enumerate() {
                    parent.spawn((
                        MaterialMeshBundle {
                            mesh: mesh.clone(),
                            material: material.clone(),
                            transform: surface_transform,
                            ..default()
                        },
                        RenderLayers::layer(layers.layer(i + 1)),
                        Name::from(format!("Surface level {}", i + 1)),
                    ));
                }
            })
            .id();

        let portal = pair.portal_mut(kind);
        portal.set_entity(entity);
        portal.set_render_target(textures[levels - 1].clone());
        portal.set_recursive_material(proxy_materials[0].clone());

        rigs.push(PortalRig {
            cameras,
            textures,
            recursive_texture,
            proxy_materials,
            main_material,
        });
    }

    if let Err(e) = pair.link_portals(PortalKind::Blue, PortalKind::Orange) {
        error!("{}", e);
    }
    commands.insert_resource(CaptureRig { portals: rigs });
}

fn load_portal_sounds(mut commands: Commands, assets: Res<AssetServer>) {
    let load = |path: &str| -> Option<Handle<AudioSource>> {
        if Path::new(SOUNDS_DIR).join(path).exists() {
            Some(assets.load(path))
        } else {
            debug!("No sound at {}", path);
            None
        }
    };
    commands.insert_resource(PortalSounds {
        enter: load("sounds/portal_enter.ogg"),
        open: load("sounds/portal_open.ogg"),
        invalid_surface: load("sounds/portal_invalid_surface.ogg"),
    });
}

/// Obtain the main camera if not already present in the resources.
fn update_main_camera(
    mut commands: Commands,
    main_camera: Option<Res<MainCamera>>,
    cameras_query: Query<(&Camera, Entity), With<FirstPersonCamera>>,
    players_query: Query<Entity, With<FirstPersonController>>,
    windows: Res<Windows>,
) {
    if main_camera.is_some() {
        return;
    }
    let primary_win = match windows.get_primary() {
        Some(window) => window,
        None => return,
    };
    if let (Ok((camera, entity)), Ok(player)) =
        (cameras_query.get_single(), players_query.get_single())
    {
        if camera.target == RenderTarget::Window(primary_win.id()) {
            // Add the portals render layer so the main camera can render them.
            commands
                .entity(entity)
                .insert(RenderLayers::default().with(PORTAL_LAYER));
            info!("Updating main camera to entity {:?}", entity);
            commands.insert_resource(MainCamera {
                camera: entity,
                player,
            });
        }
    }
}

fn route_portal_collisions(
    mut collisions: EventReader<CollisionEvent>,
    surfaces: Query<&PortalSurface>,
    mut overlaps: EventWriter<PortalOverlap>,
) {
    for collision in collisions.iter() {
        let (a, b, begin) = match *collision {
            CollisionEvent::Started(a, b, _) => (a, b, true),
            CollisionEvent::Stopped(a, b, _) => (a, b, false),
        };
        let routed = match (surfaces.get(a), surfaces.get(b)) {
            (Ok(surface), Err(_)) => Some((surface.0, b)),
            (Err(_), Ok(surface)) => Some((surface.0, a)),
            _ => None,
        };
        if let Some((portal, actor)) = routed {
            debug!("{:?} portal overlap with {:?}, begin: {}", portal, actor, begin);
            overlaps.send(PortalOverlap {
                portal,
                actor,
                begin,
            });
        }
    }
}

/// Per-frame portal update: feed the overlaps to the portals, then tick Blue and Orange in that
/// order, then hand the captures over to the renderer.
fn tick_portals(world: &mut World) {
    let overlaps: Vec<PortalOverlap> = world
        .resource_mut::<Events<PortalOverlap>>()
        .drain()
        .collect();

    world.resource_scope(|world, config: Mut<PortalConfig>| {
        world.resource_scope(|world, mut pair: Mut<PortalPair>| {
            let mut recorder = CaptureRecorder::default();
            let mut passed = Vec::new();
            {
                let mut portal_world = BevyPortalWorld::new(world);
                for overlap in overlaps {
                    if overlap.begin {
                        pair.on_overlap_begin(overlap.portal, overlap.actor, &mut portal_world);
                    } else {
                        pair.on_overlap_end(overlap.portal, overlap.actor, &mut portal_world);
                    }
                }
                for kind in PortalKind::ALL {
                    match pair.tick(kind, &mut portal_world, &mut recorder, &config) {
                        Ok(report) => {
                            if let Some(actor) = report.teleported {
                                passed.push(ActorPassedPortal { portal: kind, actor });
                            }
                        }
                        Err(e) => error!("{}", e),
                    }
                }
            }

            apply_captures(world, &mut pair, recorder);
            sync_portal_entities(world, &pair);

            let mut events = world.resource_mut::<Events<ActorPassedPortal>>();
            for event in passed {
                events.send(event);
            }
        });
    });
}

/// Collects what the portals asked to render this frame.
#[derive(Debug, Default)]
struct CaptureRecorder {
    requests: Vec<CaptureRequest>,
    clip_locations: [ClipLocations; 2],
    copies: [bool; 2],
}

impl SceneCapture for CaptureRecorder {
    fn capture(&mut self, request: &CaptureRequest) {
        self.requests.push(*request);
    }

    fn record_clip_location(&mut self, portal: PortalKind, layer: ClipLayer, rect: ClipRect) {
        self.clip_locations[portal.index()].record(layer, rect);
    }

    fn copy_to_recursive_texture(&mut self, portal: PortalKind) {
        self.copies[portal.index()] = true;
    }
}

impl CaptureRecorder {
    /// For each capture, the portal, the index of its level and whether the surface it sees at
    /// that level shows last frame's image.
    fn recursive_levels(&self) -> impl Iterator<Item = (PortalKind, usize, bool)> + '_ {
        self.requests.iter().filter_map(|request| {
            let index = (request.remaining as usize).checked_sub(1)?;
            Some((request.portal, index, request.use_recursive_material))
        })
    }
}

fn main_perspective(world: &World) -> Option<PerspectiveProjection> {
    let main_camera = world.get_resource::<MainCamera>()?;
    match world.get::<Projection>(main_camera.camera)? {
        Projection::Perspective(perspective) => Some(perspective.clone()),
        Projection::Orthographic(_) => None,
    }
}

fn apply_captures(world: &mut World, pair: &mut PortalPair, recorder: CaptureRecorder) {
    let perspective = main_perspective(world);

    world.resource_scope(|world, mut rig: Mut<CaptureRig>| {
        let mut active = HashSet::default();
        for request in &recorder.requests {
            let cameras = &rig.portals[request.portal.index()].cameras;
            let level_index = (request.remaining as usize).checked_sub(1);
            let camera = match level_index.and_then(|index| cameras.get(index)) {
                Some(&camera) => camera,
                None => {
                    debug!("No capture camera for level {}", request.remaining);
                    continue;
                }
            };
            active.insert(camera);
            if let Some(mut transform) = world.get_mut::<Transform>(camera) {
                *transform = request.camera;
            }
            if let Some(mut projection) = world.get_mut::<PortalCameraProjection>(camera) {
                if let Some(perspective) = &perspective {
                    projection.match_perspective(perspective);
                }
                projection.clip_plane = view_space_plane(&request.camera, request.clip_plane);
            }
        }

        {
            let mut materials = world.resource_mut::<Assets<PortalMaterial>>();
            for (kind, index, recursive) in recorder.recursive_levels() {
                let handle = match rig.portals[kind.index()].proxy_materials.get(index) {
                    Some(handle) => handle,
                    None => continue,
                };
                if let Some(material) = materials.get_mut(handle) {
                    if material.is_recursive() != recursive {
                        material.set_recursive(recursive);
                    }
                }
            }
        }

        for portal_rig in &rig.portals {
            for &camera in &portal_rig.cameras {
                if let Some(mut camera_component) = world.get_mut::<Camera>(camera) {
                    let is_active = active.contains(&camera);
                    if camera_component.is_active != is_active {
                        camera_component.is_active = is_active;
                    }
                }
            }
        }

        for kind in PortalKind::ALL {
            let portal_rig = &mut rig.portals[kind.index()];
            if recorder.copies[kind.index()] {
                swap_recursive_texture(world, portal_rig);
                if let Some(texture) = portal_rig.textures.last() {
                    pair.portal_mut(kind).set_render_target(texture.clone());
                }
            }

            let locations = &recorder.clip_locations[kind.index()];
            let mut materials = world.resource_mut::<Assets<PortalMaterial>>();
            for handle in portal_rig
                .proxy_materials
                .iter()
                .chain(std::iter::once(&portal_rig.main_material))
            {
                if let Some(material) = materials.get_mut(handle) {
                    material.set_clip_locations(locations);
                }
            }
        }
    });
}

/// Make the image the deepest capture was rendered into last frame the one its surface shows, and
/// render into the other one.
fn swap_recursive_texture(world: &mut World, rig: &mut PortalRig) {
    std::mem::swap(&mut rig.textures[0], &mut rig.recursive_texture);

    if let Some(mut camera) = world.get_mut::<Camera>(rig.cameras[0]) {
        camera.target = RenderTarget::Image(rig.textures[0].clone());
    }
    let consumer = rig
        .proxy_materials
        .get(1)
        .unwrap_or(&rig.main_material)
        .clone();
    let mut materials = world.resource_mut::<Assets<PortalMaterial>>();
    if let Some(material) = materials.get_mut(&rig.proxy_materials[0]) {
        material.texture = rig.recursive_texture.clone();
    }
    if let Some(material) = materials.get_mut(&consumer) {
        material.texture = rig.textures[0].clone();
    }
}

/// Move and show the portal entities to match the simulation.
fn sync_portal_entities(world: &mut World, pair: &PortalPair) {
    for kind in PortalKind::ALL {
        let portal = pair.portal(kind);
        let entity = match portal.entity() {
            Some(entity) => entity,
            None => continue,
        };
        let target = portal.frame().transform();
        if let Some(mut transform) = world.get_mut::<Transform>(entity) {
            if *transform != target {
                *transform = target;
            }
        }
        if let Some(mut visibility) = world.get_mut::<Visibility>(entity) {
            if visibility.is_visible != portal.is_active() {
                visibility.is_visible = portal.is_active();
            }
        }
    }
}

fn follow_poses(
    mut followers: Query<(&PoseFollower, &mut Transform)>,
    leaders: Query<&GlobalTransform>,
) {
    for (follower, mut transform) in &mut followers {
        if let (Ok(leader), Ok(holder)) = (
            leaders.get(follower.leader),
            leaders.get(follower.leader_holder),
        ) {
            *transform =
                Transform::from_matrix(holder.compute_matrix().inverse() * leader.compute_matrix());
        }
    }
}

/// [`PortalWorld`] over the ECS world.
pub struct BevyPortalWorld<'w> {
    world: &'w mut World,
}

impl<'w> BevyPortalWorld<'w> {
    pub fn new(world: &'w mut World) -> BevyPortalWorld<'w> {
        BevyPortalWorld { world }
    }

    fn player_facet(&self, entity: Entity, transform: &Transform) -> Option<PlayerFacet> {
        let controller = self.world.get::<FirstPersonController>(entity)?;
        let anchor = self
            .world
            .get::<Transform>(controller.camera_anchor)
            .copied()
            .unwrap_or_default();
        let camera = transform.mul_transform(anchor);
        let movement_velocity = self
            .world
            .get::<Velocity>(entity)
            .map(|velocity| velocity.linvel)
            .unwrap_or_default();
        Some(PlayerFacet {
            camera,
            look: camera.rotation,
            movement_velocity,
        })
    }

    fn surface_of(&self, entity: Entity) -> SurfaceKind {
        if let Some(clone) = self.world.get::<PortalClone>(entity) {
            // Clones are kinematic stand-ins, they are what their original is.
            return self.surface_of(clone.original);
        }
        if let Some(surface) = self.world.get::<PortalSurface>(entity) {
            SurfaceKind::Portal(surface.0)
        } else if self.world.get::<Portalable>(entity).is_some() {
            SurfaceKind::Portalable
        } else if let Some(RigidBody::Dynamic) = self.world.get::<RigidBody>(entity) {
            SurfaceKind::Dynamic
        } else {
            SurfaceKind::Blocking
        }
    }

    fn bounds_of(&self, entity: Entity) -> Option<Bounds> {
        let aabb = self.world.get::<Aabb>(entity)?;
        let transform = self.world.get::<GlobalTransform>(entity)?;
        Some(
            Bounds {
                center: aabb.center.into(),
                extent: aabb.half_extents.into(),
            }
            .transformed(transform),
        )
    }

    /// Rays go through other sensors, and through portals that are closed.
    fn blocks_rays(&self, entity: Entity) -> bool {
        if self.world.get::<PortalSurface>(entity).is_some() {
            return self
                .world
                .get::<Visibility>(entity)
                .map_or(false, |visibility| visibility.is_visible);
        }
        self.world.get::<Sensor>(entity).is_none()
    }
}

impl PortalWorld for BevyPortalWorld<'_> {
    fn actor(&self, entity: Entity) -> Option<Actor> {
        let transform = *self.world.get::<Transform>(entity)?;
        let kind = match self.player_facet(entity, &transform) {
            Some(facet) => ActorKind::Player(facet),
            None => ActorKind::Prop,
        };
        Some(Actor {
            entity,
            transform,
            kind,
        })
    }

    fn teleport_actor(&mut self, entity: Entity, translation: Vec3) {
        if let Some(mut transform) = self.world.get_mut::<Transform>(entity) {
            transform.translation = translation;
        }
    }

    fn set_rotation(&mut self, entity: Entity, rotation: Quat) {
        if let Some(mut transform) = self.world.get_mut::<Transform>(entity) {
            transform.rotation = rotation;
        }
    }

    fn body_mut(&mut self, entity: Entity) -> Option<&mut Velocity> {
        self.world.get_mut::<Velocity>(entity).map(Mut::into_inner)
    }

    fn set_player_view(&mut self, entity: Entity, view: PlayerView) {
        let anchor = match self.world.get::<FirstPersonController>(entity) {
            Some(controller) => controller.camera_anchor,
            None => return,
        };
        let (yaw, pitch, _) = view.look.to_euler(EulerRot::YXZ);
        if let Some(mut controller) = self.world.get_mut::<FirstPersonController>(entity) {
            controller.theta = Angle::radians(yaw);
            controller.phi = Angle::radians(-pitch);
        }
        if let Some(mut transform) = self.world.get_mut::<Transform>(anchor) {
            transform.rotation = Quat::from_rotation_x(pitch);
        }
        if let Some(mut velocity) = self.world.get_mut::<Velocity>(entity) {
            velocity.linvel = view.movement_velocity;
        }
    }

    fn set_collision_profile(&mut self, entity: Entity, profile: CollisionProfile) {
        let surface = match profile {
            CollisionProfile::PassThrough {
                surface: Some(surface),
            } => self
                .world
                .get::<CollisionGroups>(surface)
                .map(|groups| groups.memberships),
            _ => None,
        };
        if let Some(mut groups) = self.world.get_mut::<CollisionGroups>(entity) {
            apply_profile(&mut groups, profile, surface);
        }
    }

    fn duplicate_actor(&mut self, entity: Entity) -> Option<Entity> {
        let source = self.world.get_entity(entity)?;
        let transform = *source.get::<Transform>()?;
        let mesh = source.get::<Handle<Mesh>>().cloned();
        let material = source.get::<Handle<StandardMaterial>>().cloned();
        let collider = source.get::<Collider>().cloned();
        let groups = source.get::<CollisionGroups>().cloned();
        let name = source
            .get::<Name>()
            .map_or_else(|| format!("{:?} (clone)", entity), |name| format!("{} (clone)", name));

        let mut clone = self.world.spawn((
            SpatialBundle::from_transform(transform),
            PortalClone { original: entity },
            Name::from(name),
        ));
        if let Some(mesh) = mesh {
            clone.insert(mesh);
        }
        if let Some(material) = material {
            clone.insert(material);
        }
        if let Some(collider) = collider {
            clone.insert((
                collider,
                groups.unwrap_or_else(|| CollisionGroups::new(PROPS_GROUP, ALL_GROUPS)),
                RigidBody::KinematicVelocityBased,
                Velocity::default(),
            ));
        }
        Some(clone.id())
    }

    fn carried_actors(&self, holder: Entity) -> Vec<Entity> {
        self.world
            .get::<CarriedItems>(holder)
            .map(|carried| carried.0.clone())
            .unwrap_or_default()
    }

    fn attach_carried(&mut self, carried: Entity, holder: Entity) {
        match self.world.get_entity_mut(holder) {
            Some(mut holder_entity) => {
                holder_entity.push_children(&[carried]);
                if holder_entity.contains::<CarriedItems>() {
                    if let Some(mut items) = holder_entity.get_mut::<CarriedItems>() {
                        items.0.push(carried);
                    }
                } else {
                    holder_entity.insert(CarriedItems(vec![carried]));
                }
            }
            None => warn!("Cannot attach {:?} to missing {:?}", carried, holder),
        }
    }

    fn follow_pose(&mut self, follower: Entity, leader: Entity) {
        let mut holders = self.world.query::<(Entity, &CarriedItems)>();
        let leader_holder = holders
            .iter(self.world)
            .find(|(_, items)| items.0.contains(&leader))
            .map(|(holder, _)| holder);
        match (leader_holder, self.world.get_entity_mut(follower)) {
            (Some(leader_holder), Some(mut follower)) => {
                follower.insert(PoseFollower {
                    leader,
                    leader_holder,
                });
            }
            _ => warn!("{:?} cannot follow {:?}", follower, leader),
        }
    }

    fn destroy_actor(&mut self, entity: Entity) {
        if self.world.get_entity(entity).is_some() {
            despawn_with_children_recursive(self.world, entity);
        }
    }

    fn play_sound(&mut self, cue: SoundCue, location: Vec3) {
        let sound = self
            .world
            .get_resource::<PortalSounds>()
            .and_then(|sounds| sounds.get(cue).cloned());
        match (sound, self.world.get_resource::<Audio>()) {
            (Some(sound), Some(audio)) => {
                audio.play(sound);
            }
            _ => debug!("{:?} at {}", cue, location),
        }
    }

    fn active_camera(&self) -> Option<CameraPose> {
        let main_camera = self.world.get_resource::<MainCamera>()?;
        let projection = self
            .world
            .get::<Projection>(main_camera.camera)?
            .get_projection_matrix();
        let transform = match self.actor(main_camera.player).map(|actor| actor.kind) {
            Some(ActorKind::Player(facet)) => facet.camera,
            _ => self
                .world
                .get::<GlobalTransform>(main_camera.camera)?
                .compute_transform(),
        };
        Some(CameraPose {
            transform,
            projection,
        })
    }

    fn line_trace(
        &self,
        origin: Vec3,
        direction: Vec3,
        max_distance: f32,
        ignore: &[Entity],
    ) -> Vec<TraceHit> {
        let rapier = match self.world.get_resource::<RapierContext>() {
            Some(rapier) => rapier,
            None => return Vec::new(),
        };
        let predicate = |entity: Entity| !ignore.contains(&entity) && self.blocks_rays(entity);
        let mut intersections = Vec::new();
        rapier.intersections_with_ray(
            origin,
            direction.normalize_or_zero(),
            max_distance,
            true,
            QueryFilter::new().predicate(&predicate),
            |entity, intersection| {
                intersections.push((entity, intersection));
                true
            },
        );
        intersections.sort_by(|(_, a), (_, b)| a.toi.total_cmp(&b.toi));

        intersections
            .into_iter()
            .map(|(entity, intersection)| TraceHit {
                point: intersection.point,
                normal: intersection.normal,
                distance: intersection.toi,
                entity,
                bounds: self.bounds_of(entity),
                surface: self.surface_of(entity),
            })
            .collect()
    }
}
