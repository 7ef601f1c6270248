//! Native services behind a home page running in an embedded script
//! context: durable `LocalStorage` and off-screen favicon lookup.
mod error;
pub use error::*;
mod config;
pub use config::*;
mod engines;
pub use engines::*;
mod icon;
pub use icon::*;
mod ui;
pub use ui::*;
mod favicon;
pub use favicon::*;
mod bridge;
pub use bridge::*;
