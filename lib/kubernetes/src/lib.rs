mod client;
mod config;
mod resource;
mod version;

pub use client::{Client, Error, ErrorResponse};
pub use config::{Auth, Config};
pub use resource::{ConfigMap, ObjectMeta, Resource};
pub use version::Version;
