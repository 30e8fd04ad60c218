use bevy::prelude::*;
use bevy_rapier3d::prelude::{CollisionGroups, Group, RapierConfiguration, TimestepMode};

use crate::plugins::portal::CollisionProfile;

pub const WALLS_GROUP: Group = Group::GROUP_1;
pub const PROPS_GROUP: Group = Group::GROUP_2;
pub const PORTAL_GROUP: Group = Group::GROUP_3;
pub const PLAYER_GROUP: Group = Group::GROUP_4;
pub const GROUND_GROUP: Group = Group::GROUP_5;
/// Static geometry which never accepts portals.
pub const SOLID_GROUP: Group = Group::GROUP_6;
/// Groups of the surfaces portals can be set in.
pub const SURFACE_GROUPS: Group = WALLS_GROUP.union(GROUND_GROUP);
pub const ALL_GROUPS: Group = Group::ALL;

pub struct PhysicsPlugin;

impl Plugin for PhysicsPlugin {
    fn build(&self, app: &mut App) {
        app.add_startup_system(configure_rapier);
    }
}

fn configure_rapier(mut config: ResMut<RapierConfiguration>) {
    // Extra CCD substeps because them portals can go fast
    config.timestep_mode = TimestepMode::Variable {
        max_dt: 1. / 20.,
        time_scale: 1.,
        substeps: 4,
    }
}

/// Groups an actor interacts with under a collision profile. Passing through a portal means
/// ignoring the kind of surface it is set in, `surface` being the memberships of that surface.
/// Without one, portals are assumed to be on walls.
pub fn profile_filters(profile: CollisionProfile, surface: Option<Group>) -> Group {
    match profile {
        CollisionProfile::Standard => ALL_GROUPS,
        CollisionProfile::PassThrough { .. } => {
            let ignored = surface.map_or(WALLS_GROUP, |surface| surface & SURFACE_GROUPS);
            ALL_GROUPS - ignored
        }
    }
}

pub fn apply_profile(groups: &mut CollisionGroups, profile: CollisionProfile, surface: Option<Group>) {
    groups.filters = profile_filters(profile, surface);
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASS_THROUGH: CollisionProfile = CollisionProfile::PassThrough { surface: None };

    #[test]
    fn pass_through_a_wall_only_drops_walls() {
        let mut groups = CollisionGroups::new(PROPS_GROUP, ALL_GROUPS);
        apply_profile(&mut groups, PASS_THROUGH, Some(WALLS_GROUP));
        assert!(!groups.filters.contains(WALLS_GROUP));
        assert!(groups.filters.contains(GROUND_GROUP | SOLID_GROUP | PORTAL_GROUP | PLAYER_GROUP));

        apply_profile(&mut groups, CollisionProfile::Standard, Some(WALLS_GROUP));
        assert_eq!(groups.filters, ALL_GROUPS);
    }

    #[test]
    fn pass_through_a_floor_drops_the_ground() {
        let filters = profile_filters(PASS_THROUGH, Some(GROUND_GROUP));
        assert!(!filters.contains(GROUND_GROUP));
        assert!(filters.contains(WALLS_GROUP | SOLID_GROUP | PROPS_GROUP));
    }

    #[test]
    fn pass_through_never_drops_actors_or_solid_geometry() {
        let filters = profile_filters(PASS_THROUGH, Some(ALL_GROUPS));
        assert_eq!(filters, ALL_GROUPS - SURFACE_GROUPS);

        // Unknown surfaces are taken to be walls.
        assert_eq!(profile_filters(PASS_THROUGH, None), ALL_GROUPS - WALLS_GROUP);
    }
}
