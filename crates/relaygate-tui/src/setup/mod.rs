//! Interactive install wizard

mod wizard;

pub use wizard::{build_config, InstallAnswers, InstallWizard};
