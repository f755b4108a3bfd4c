//! Zenoh network layer for the session transport

pub mod host_liveliness;
pub mod keyexpr;
pub mod scene_channel;

pub use host_liveliness::{host_alive, HostLivelinessToken, HostWatch};
pub use keyexpr::{HostKeyexpr, SceneKeyexpr};
pub use scene_channel::{ScenePublisher, SceneSubscriber};
