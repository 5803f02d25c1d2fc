//! User configuration stored as `config.toml` in the platform config
//! directory. Loaded explicitly and passed to whoever needs it.

pub mod data;
pub mod defaults;
pub mod io;

#[cfg(test)]
mod tests;

pub use data::{Config, CustomProvider, GenerationDefaults};
pub use io::ConfigError;
