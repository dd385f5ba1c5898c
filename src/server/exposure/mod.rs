//! API exposure of the application
//!
//! Each exposure consumes an `Application` and produces a router for its
//! protocol. REST is the only one.

pub mod rest;

pub use rest::RestExposure;
