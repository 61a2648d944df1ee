//! Turn foot pedals and auxiliary keypads into command launchers.
//!
//! Each configured device gets its own session that grabs the device
//! exclusively, reads raw key events, and launches the commands bound to
//! each key transition. Sessions survive unplug/replug cycles and clean up
//! their in-flight commands when a device disappears.

pub mod cancel;
pub mod config;
pub mod dispatch;
pub mod keymap;
pub mod listing;
pub mod runner;
pub mod session;
pub mod supervisor;

pub use config::{Config, DeviceConfig, DispatchMode, KeyBinding, UnknownKeyPolicy};
pub use keymap::{KeyMap, KeyState, KeymapError};
pub use supervisor::Supervisor;
