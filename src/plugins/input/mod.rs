use bevy::prelude::*;
use leafwing_input_manager::prelude::*;

#[derive(Debug)]
pub struct InputPlugin;

impl Plugin for InputPlugin {
    fn build(&self, app: &mut App) {
        app.add_plugin(InputManagerPlugin::<Actions>::default())
            .add_startup_system(toggle_on_start)
            .add_system(toggle_mouse_capture);
    }
}

#[derive(Actionlike, Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Everything the player can do.
pub enum Actions {
    Forward,
    Backwards,
    StrafeLeft,
    StrafeRight,
    Sprint,
    Aim,
    FireBlue,
    FireOrange,
    Grab,
}

pub fn default_input_map() -> InputMap<Actions> {
    let mut map = InputMap::new([
        (KeyCode::W, Actions::Forward),
        (KeyCode::S, Actions::Backwards),
        (KeyCode::A, Actions::StrafeLeft),
        (KeyCode::D, Actions::StrafeRight),
        (KeyCode::LShift, Actions::Sprint),
        (KeyCode::E, Actions::Grab),
    ]);
    map.insert(MouseButton::Left, Actions::FireBlue)
        .insert(MouseButton::Right, Actions::FireOrange)
        .insert(DualAxis::mouse_motion(), Actions::Aim);
    map
}

fn toggle_on_start(mut windows: ResMut<Windows>) {
    if let Some(window) = windows.get_primary_mut() {
        window.set_cursor_visibility(false);
        window.set_cursor_grab_mode(bevy::window::CursorGrabMode::Locked);
    }
}

fn toggle_mouse_capture(mut windows: ResMut<Windows>, tab_input: Res<Input<KeyCode>>) {
    if let Some(window) = windows.get_primary_mut() {
        if tab_input.just_pressed(KeyCode::Tab) {
            let locked = window.cursor_grab_mode() != bevy::window::CursorGrabMode::None;
            window.set_cursor_visibility(locked);
            window.set_cursor_grab_mode(if locked {
                bevy::window::CursorGrabMode::None
            } else {
                bevy::window::CursorGrabMode::Locked
            });
        }
    }
}
