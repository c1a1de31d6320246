#![allow(clippy::uninlined_format_args)]

pub mod app;
pub mod config;
pub mod coordinator;
pub mod coverage;
pub mod fetch;
pub mod flarum;
pub mod index;
pub mod reconcile;
pub mod scroll;
pub mod window;

#[cfg(test)]
mod testing;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use app::run;
