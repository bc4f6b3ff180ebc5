//! relaygate TUI - interactive menu, install wizard and log viewers
//!
//! This crate provides:
//! - The numbered main menu driving install, add-port, schedule and uninstall
//! - A styled install wizard
//! - The monitor screen and the log follow / search views

pub mod logs;
pub mod menu;
pub mod monitor;
pub mod prompt;
pub mod setup;
pub mod style;

pub use menu::Menu;
pub use prompt::Prompter;
pub use setup::InstallWizard;
pub use style::Printer;
