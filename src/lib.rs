pub mod accounts;
pub mod ai;
pub mod assistant;
pub mod browser;
pub mod capture;
pub mod dispatcher;
pub mod session;
pub mod settings;
pub mod voice;

#[cfg(feature = "shell")]
mod shell;
#[cfg(feature = "shell")]
mod tray;

#[cfg(feature = "shell")]
pub use shell::run;
