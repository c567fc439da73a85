pub mod config;
pub mod duration;
pub mod event;
pub mod pipeline;
pub mod shutdown;
pub mod signal;
pub mod sinks;
pub mod sources;
pub mod topology;
pub mod trace;

pub use pipeline::Pipeline;
pub use shutdown::{ShutdownCoordinator, ShutdownSignal};
pub use signal::{SignalHandler, SignalTo};

/// Capsule's basic error type, dynamically dispatched and safe to send across threads
pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Capsule's basic result type, defined in terms of [`Error`] and generic over `T`
pub type Result<T> = std::result::Result<T, Error>;
