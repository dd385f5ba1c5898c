//! Application context, model registry and HTTP exposure

pub mod application;
pub mod exposure;
pub mod registry;

pub use application::Application;
pub use exposure::RestExposure;
pub use registry::{ModelHandle, ModelRegistry};
