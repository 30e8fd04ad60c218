use std::{f32::consts::PI, fs, path::Path};

use bevy::prelude::*;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CONFIG_PATH: &str = "assets/config/portal.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read portal config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid portal config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Tunables of the portal simulation.
#[derive(Debug, Clone, PartialEq, Deserialize, Resource)]
#[serde(default)]
pub struct PortalConfig {
    /// Number of nested captures rendered each frame. Deeper levels reuse last frame's image.
    pub max_recursion: u32,
    /// Captures stop when the virtual camera looks away from the linked portal past this dot product.
    pub view_cull_dot: f32,
    /// Nested clip rectangles are only recorded when the portals face each other past this dot product.
    pub facing_dot: f32,
    /// Turn applied around the destination up axis when mapping orientations.
    pub flip_angle: f32,
    pub portal_half_height: f32,
    pub portal_half_width: f32,
    /// Distance the portal center is pushed into the target surface.
    pub wall_offset: f32,
    /// Half thickness of the box around an open portal in which its surface is not drawn.
    pub dissolve_half_depth: f32,
    pub gun_range: f32,
    pub grab_range: f32,
    pub hold_distance: f32,
    /// Grabbed objects further than this from their hold point are dropped.
    pub max_hold_error: f32,
    pub hold_stiffness: f32,
    pub blue_stencil: u8,
    pub orange_stencil: u8,
}

impl Default for PortalConfig {
    fn default() -> Self {
        PortalConfig {
            max_recursion: 2,
            view_cull_dot: -0.666,
            facing_dot: -0.2,
            flip_angle: PI,
            portal_half_height: 0.9,
            portal_half_width: 0.6,
            wall_offset: 0.03,
            dissolve_half_depth: 0.1,
            gun_range: 30.,
            grab_range: 4.,
            hold_distance: 1.5,
            max_hold_error: 2.5,
            hold_stiffness: 12.,
            blue_stencil: 1,
            orange_stencil: 2,
        }
    }
}

impl PortalConfig {
    pub fn from_json_str(json: &str) -> Result<PortalConfig, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<PortalConfig, ConfigError> {
        let json = fs::read_to_string(path)?;
        PortalConfig::from_json_str(&json)
    }

    /// Load the config file, falling back to defaults when it is missing or malformed.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> PortalConfig {
        match PortalConfig::load(&path) {
            Ok(config) => {
                info!("Loaded portal config from {}", path.as_ref().display());
                config
            }
            Err(e) => {
                warn!("{}, using defaults", e);
                PortalConfig::default()
            }
        }
    }

    pub fn portal_half_size(&self) -> Vec2 {
        Vec2::new(self.portal_half_width, self.portal_half_height)
    }
}
