use bevy::{app::PluginGroupBuilder, prelude::*};

#[derive(Debug)]
/// Development plugins intended for debug builds use.
pub struct DeveloperPlugins;

impl PluginGroup for DeveloperPlugins {
    fn build(self) -> PluginGroupBuilder {
        let group = PluginGroupBuilder::start::<Self>();
        #[cfg(feature = "editor")]
        let group = group.add(bevy_editor_pls::prelude::EditorPlugin);
        group
    }
}
