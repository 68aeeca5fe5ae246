//! Renders the Phoenix escape-time fractal with a `wgpu` compute shader and writes it as a
//! grayscale BMP.

pub mod backend;
pub mod bitmap;
pub mod command_buffer;
pub mod command_encoder;
pub mod compute;
pub mod config;
pub mod error;
pub mod kernel;
pub mod lifecycle;
pub mod normalize;
pub mod plane;
pub mod render;
pub mod typed_buffer;

pub use config::Config;
pub use error::{Error, Result};
