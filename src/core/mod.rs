// Core data types, clocks and configuration

pub mod types;
pub mod image;
pub mod clock;
pub mod config;
pub mod error;

pub use types::*;
pub use image::*;
pub use clock::*;
pub use config::*;
pub use error::*;
