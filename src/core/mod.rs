//! Core types, errors, logging, configuration and the camera

pub mod types;
pub mod error;
pub mod logging;
pub mod config;
pub mod camera;

pub use types::*;
pub use error::{Error, FetchError};
pub use config::PlanetConfig;
pub use camera::{Camera, View};
