use async_trait::async_trait;
use futures::FutureExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::trace;

use super::{Healthcheck, Sink, SinkConfig, StreamSink};
use crate::event::Observation;

/// Discards every observation, useful for testing the poller itself.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {}

#[async_trait]
#[typetag::serde(name = "blackhole")]
impl SinkConfig for Config {
    async fn build(&self) -> crate::Result<(Sink, Healthcheck)> {
        let sink = BlackholeSink::default();
        let health_check = futures::future::ok(()).boxed();

        Ok((Box::new(sink), health_check))
    }
}

#[derive(Default)]
struct BlackholeSink {
    total: usize,
}

#[async_trait]
impl StreamSink for BlackholeSink {
    async fn run(mut self: Box<Self>, mut input: BoxStream<'_, Observation>) -> Result<(), ()> {
        while let Some(_observation) = input.next().await {
            self.total += 1;
        }

        trace!(message = "Blackhole sink finished", total = self.total);

        Ok(())
    }
}
