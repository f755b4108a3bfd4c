use crate::roster::SlotView;
use crate::types::SceneRef;

/// UI collaborator driven by the coordinator
///
/// The coordinator never renders anything itself: it loads scenes, toggles the
/// menu and hands over the roster view through this trait.
pub trait MenuFrontend: Send + Sync {
    /// Show the lobby menu
    fn show_menu(&self);

    /// Hide the lobby menu
    fn hide_menu(&self);

    /// Load a scene locally
    fn load_scene(&self, scene: &SceneRef);

    /// Roster slots changed
    fn roster_changed(&self, _slots: &[SlotView]) {}

    /// Application should terminate
    fn quit(&self) {}
}
