pub mod blackhole;
pub mod console;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::event::Observation;

pub type Healthcheck = BoxFuture<'static, crate::Result<()>>;

#[async_trait]
pub trait StreamSink {
    async fn run(self: Box<Self>, input: BoxStream<'_, Observation>) -> Result<(), ()>;
}

pub type Sink = Box<dyn StreamSink + Send>;

/// Generalized trait for describing and building sink components.
#[async_trait]
#[typetag::serde(tag = "type")]
pub trait SinkConfig: std::fmt::Debug + Send + Sync {
    /// Builds the sink along with a healthcheck that is run once at startup.
    async fn build(&self) -> crate::Result<(Sink, Healthcheck)>;
}
