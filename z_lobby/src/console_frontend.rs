use std::sync::Mutex;

use console::{style, Style};
use lobby_session::{MenuFrontend, SceneRef, SlotAvatar, SlotView};

/// Prints one simulated member's UI calls to the terminal
pub struct ConsoleFrontend {
    name: String,
    style: Style,
    slots: Mutex<Vec<SlotView>>,
}

impl ConsoleFrontend {
    pub fn new(name: String, color: u8) -> Self {
        Self {
            name,
            style: Style::new().color256(color).bold(),
            slots: Mutex::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn say(&self, message: impl std::fmt::Display) {
        println!("{} {}", self.style.apply_to(format!("[{}]", self.name)), message);
    }

    /// Print the last roster handed over by the coordinator
    pub fn print_roster(&self) {
        let slots = self.slots.lock().unwrap_or_else(|e| e.into_inner()).clone();
        self.say("roster:");
        for slot in slots {
            let avatar = match slot.avatar {
                SlotAvatar::Loaded(avatar) => format!("{}x{}", avatar.width(), avatar.height()),
                SlotAvatar::Placeholder => "--".to_string(),
            };
            let name = if slot.is_local {
                style(slot.display_name).bold().to_string()
            } else if slot.occupied {
                slot.display_name
            } else {
                style(slot.display_name).dim().to_string()
            };
            println!("    {} [{}] {}", slot.index, avatar, name);
        }
    }
}

impl MenuFrontend for ConsoleFrontend {
    fn show_menu(&self) {
        self.say("menu shown");
    }

    fn hide_menu(&self) {
        self.say("menu hidden");
    }

    fn load_scene(&self, scene: &SceneRef) {
        self.say(format!("loading scene {}", style(scene).cyan()));
    }

    fn roster_changed(&self, slots: &[SlotView]) {
        *self.slots.lock().unwrap_or_else(|e| e.into_inner()) = slots.to_vec();
    }

    fn quit(&self) {
        self.say(style("quit").red());
    }
}
