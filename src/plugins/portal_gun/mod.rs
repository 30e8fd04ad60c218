//! The portal gun: places portals on the walls it is fired at, and carries objects around,
//! including through portals.

use bevy::prelude::*;
use leafwing_input_manager::prelude::*;

use crate::plugins::{
    input::Actions,
    portal::{
        geometry::ray_portal_intersection,
        placement::{solve_placement, PortalPlacement},
        ActorPassedPortal, BevyPortalWorld, MainCamera, PortalConfig, PortalFrame, PortalKind,
        PortalLabels, PortalMapping, PortalPair, PortalWorld, SoundCue, SurfaceKind,
    },
};

/// How far past the portal plane a hold point is pushed when holding through a portal, so that
/// the object ends up on the other side.
const MIN_DEPTH_PAST_PORTAL: f32 = 0.5;

#[derive(Debug)]
pub struct PortalGunPlugin;

impl Plugin for PortalGunPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<GrabbedObject>()
            .add_system(
                fire_portals
                    .after(PortalLabels::UpdateMainCamera)
                    .before(PortalLabels::Tick),
            )
            .add_system(
                grab_objects
                    .after(PortalLabels::UpdateMainCamera)
                    .before(PortalLabels::Tick),
            )
            .add_system(track_grab_space.after(PortalLabels::Tick));
    }
}

/// An object held by the gun.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Grab {
    pub entity: Entity,
    /// Set when the object is on the far side of this portal as seen from the holder.
    pub through: Option<PortalKind>,
}

impl Grab {
    /// Keep track of which side of the link the object is on when it or its holder goes through
    /// `portal`, whose other end is `link`.
    pub fn on_actor_passed_portal(
        &mut self,
        actor: Entity,
        portal: PortalKind,
        link: PortalKind,
        holder: Entity,
    ) {
        if actor == self.entity {
            self.through = match self.through {
                None => Some(portal),
                Some(_) => None,
            };
        } else if actor == holder {
            self.through = match self.through {
                None => Some(link),
                Some(_) => None,
            };
        }
    }
}

#[derive(Debug, Default, Resource)]
pub struct GrabbedObject {
    grab: Option<Grab>,
}

impl GrabbedObject {
    pub fn grab(&self) -> Option<Grab> {
        self.grab
    }

    /// Pick up or drop an object when `toggle` is set, then pull the held object toward the hold
    /// point. The object is dropped when it cannot follow.
    pub fn update(
        &mut self,
        toggle: bool,
        holder: Entity,
        pair: &PortalPair,
        world: &mut dyn PortalWorld,
        config: &PortalConfig,
    ) {
        if toggle {
            match self.grab.take() {
                Some(grab) => info!("Released {:?}", grab.entity),
                None => {
                    self.grab = try_grab(holder, pair, world, config);
                    if let Some(grab) = &self.grab {
                        info!("Grabbed {:?}, through {:?}", grab.entity, grab.through);
                    }
                }
            }
        }

        if let Some(grab) = self.grab {
            let camera = match world.active_camera() {
                Some(camera) => camera,
                None => return,
            };
            if !hold(&grab, &camera.transform, pair, world, config) {
                info!("Dropped {:?}", grab.entity);
                self.grab = None;
            }
        }
    }
}

/// Fire a portal from the active camera. The portal is moved and opened when the first thing hit
/// is a portalable surface the portal fits on.
pub fn fire_portal(
    kind: PortalKind,
    shooter: Entity,
    pair: &mut PortalPair,
    world: &mut dyn PortalWorld,
    config: &PortalConfig,
) -> Option<PortalPlacement> {
    let camera = world.active_camera()?;
    let origin = camera.transform.translation;
    let direction = camera.transform.forward();

    let hit = match world
        .line_trace(origin, direction, config.gun_range, &[shooter])
        .into_iter()
        .next()
    {
        Some(hit) => hit,
        None => {
            debug!("The {:?} portal shot hit nothing", kind);
            return None;
        }
    };

    let placement = match hit.surface {
        SurfaceKind::Portalable => solve_placement(
            &hit,
            pair.portal(kind).frame().rotation,
            direction,
            config.portal_half_size(),
            config.wall_offset,
        ),
        _ => None,
    };
    match placement {
        Some(placement) => {
            pair.place(
                kind,
                PortalFrame::new(placement.center, placement.rotation),
                Some(hit.entity),
                world,
            );
            pair.activate(kind);
            world.play_sound(SoundCue::PortalOpen, placement.center);
            info!("Placed the {:?} portal at {}", kind, placement.center);
            Some(placement)
        }
        None => {
            world.play_sound(SoundCue::PortalInvalidSurface, hit.point);
            info!("Cannot place the {:?} portal on {:?}", kind, hit.entity);
            None
        }
    }
}

/// Find an object to pick up in front of the active camera, directly or through an open portal.
pub fn try_grab(
    holder: Entity,
    pair: &PortalPair,
    world: &dyn PortalWorld,
    config: &PortalConfig,
) -> Option<Grab> {
    let camera = world.active_camera()?;
    let origin = camera.transform.translation;
    let direction = camera.transform.forward();
    let hit = world
        .line_trace(origin, direction, config.grab_range, &[holder])
        .into_iter()
        .next()?;

    match hit.surface {
        SurfaceKind::Dynamic => grabbable(holder, hit.entity, None, pair),
        SurfaceKind::Portal(kind) if pair.is_open(kind) => {
            let mapping = pair.mapping(kind).ok()?;
            let half_size = config.portal_half_size();
            let toi =
                ray_portal_intersection(origin, direction, &mapping.src, half_size.x, half_size.y)?;
            // The portal plane is inside the wall, start clear of it.
            let mapped_origin = mapping.point(origin + direction * toi)
                + mapping.dest.forward() * config.wall_offset * 2.;
            let mut ignore = vec![holder];
            ignore.extend(PortalKind::ALL.iter().filter_map(|&end| pair.portal(end).entity()));

            let hit = world
                .line_trace(
                    mapped_origin,
                    mapping.vector(direction),
                    config.grab_range - toi,
                    &ignore,
                )
                .into_iter()
                .next()?;
            match hit.surface {
                SurfaceKind::Dynamic => grabbable(holder, hit.entity, Some(kind), pair),
                _ => None,
            }
        }
        _ => None,
    }
}

/// The grab of a dynamic object that was hit, seen through `through`. Hitting the clone of an
/// object grabs the object itself, which is on the other side of the portal the clone stands in.
fn grabbable(
    holder: Entity,
    hit: Entity,
    through: Option<PortalKind>,
    pair: &PortalPair,
) -> Option<Grab> {
    let grab = match pair.get_original_if_clone(hit) {
        Some(original) => {
            let entrance = PortalKind::ALL
                .into_iter()
                .find(|&kind| pair.portal(kind).clone_of(original) == Some(hit))?;
            // The clone stands at the exit of the portal its original entered.
            let exit = pair.portal(entrance).link()?;
            Grab {
                entity: original,
                through: match through {
                    None => Some(exit),
                    Some(_) => None,
                },
            }
        }
        None => Grab {
            entity: hit,
            through,
        },
    };
    (grab.entity != holder).then_some(grab)
}

/// Where a held object should be. When held through a portal, `None` means that the portal is no
/// longer in the line of sight.
pub fn hold_target(
    camera: &Transform,
    through: Option<&PortalMapping>,
    half_size: Vec2,
    hold_distance: f32,
) -> Option<Vec3> {
    let origin = camera.translation;
    let direction = camera.forward();
    match through {
        None => Some(origin + direction * hold_distance),
        Some(mapping) => {
            let toi =
                ray_portal_intersection(origin, direction, &mapping.src, half_size.x, half_size.y)?;
            let distance = hold_distance.max(toi + MIN_DEPTH_PAST_PORTAL);
            Some(mapping.point(origin + direction * distance))
        }
    }
}

/// Velocity pulling an object at `position` toward `target`, or `None` when it is too far away to
/// still be held.
pub fn pull_velocity(target: Vec3, position: Vec3, stiffness: f32, max_error: f32) -> Option<Vec3> {
    let error = target - position;
    (error.length() <= max_error).then_some(error * stiffness)
}

fn hold(
    grab: &Grab,
    camera: &Transform,
    pair: &PortalPair,
    world: &mut dyn PortalWorld,
    config: &PortalConfig,
) -> bool {
    let object = match world.actor(grab.entity) {
        Some(object) => object,
        None => return false,
    };
    let mapping = match grab.through {
        Some(kind) if pair.is_open(kind) => match pair.mapping(kind) {
            Ok(mapping) => Some(mapping),
            Err(_) => return false,
        },
        Some(_) => return false,
        None => None,
    };

    let target = match hold_target(
        camera,
        mapping.as_ref(),
        config.portal_half_size(),
        config.hold_distance,
    ) {
        Some(target) => target,
        None => return false,
    };
    let velocity = match pull_velocity(
        target,
        object.transform.translation,
        config.hold_stiffness,
        config.max_hold_error,
    ) {
        Some(velocity) => velocity,
        None => return false,
    };

    match world.body_mut(grab.entity) {
        Some(body) => {
            body.linvel = velocity;
            body.angvel = Vec3::ZERO;
            true
        }
        None => {
            warn!("Held object {:?} has no body", grab.entity);
            false
        }
    }
}

fn fire_portals(world: &mut World) {
    let main_camera = match world.get_resource::<MainCamera>() {
        Some(main_camera) => *main_camera,
        None => return,
    };
    let kind = match world.get::<ActionState<Actions>>(main_camera.player) {
        Some(actions) if actions.just_pressed(Actions::FireBlue) => PortalKind::Blue,
        Some(actions) if actions.just_pressed(Actions::FireOrange) => PortalKind::Orange,
        _ => return,
    };

    world.resource_scope(|world, config: Mut<PortalConfig>| {
        world.resource_scope(|world, mut pair: Mut<PortalPair>| {
            let mut portal_world = BevyPortalWorld::new(world);
            fire_portal(kind, main_camera.player, &mut pair, &mut portal_world, &config);
        });
    });
}

fn grab_objects(world: &mut World) {
    let main_camera = match world.get_resource::<MainCamera>() {
        Some(main_camera) => *main_camera,
        None => return,
    };
    let toggle = world
        .get::<ActionState<Actions>>(main_camera.player)
        .map_or(false, |actions| actions.just_pressed(Actions::Grab));

    world.resource_scope(|world, config: Mut<PortalConfig>| {
        world.resource_scope(|world, pair: Mut<PortalPair>| {
            world.resource_scope(|world, mut grabbed: Mut<GrabbedObject>| {
                let mut portal_world = BevyPortalWorld::new(world);
                grabbed.update(toggle, main_camera.player, &pair, &mut portal_world, &config);
            });
        });
    });
}

fn track_grab_space(
    mut passed: EventReader<ActorPassedPortal>,
    mut grabbed: ResMut<GrabbedObject>,
    main_camera: Option<Res<MainCamera>>,
    pair: Res<PortalPair>,
) {
    let holder = match main_camera {
        Some(main_camera) => main_camera.player,
        None => return,
    };
    for event in passed.iter() {
        let link = pair
            .portal(event.portal)
            .link()
            .unwrap_or_else(|| event.portal.other());
        if let Some(grab) = &mut grabbed.grab {
            grab.on_actor_passed_portal(event.actor, event.portal, link, holder);
            debug!("Held object now through {:?}", grab.through);
        }
    }
}
