use async_trait::async_trait;
use futures::FutureExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio_stream::StreamExt;
use tracing::{error, warn};

use super::{Healthcheck, Sink, SinkConfig, StreamSink};
use crate::event::Observation;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
enum Stream {
    #[default]
    Stdout,
    Stderr,
}

/// Writes each observation as one line of JSON.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The standard stream to write to.
    #[serde(default)]
    stream: Stream,
}

#[async_trait]
#[typetag::serde(name = "console")]
impl SinkConfig for Config {
    async fn build(&self) -> crate::Result<(Sink, Healthcheck)> {
        let sink: Sink = match self.stream {
            Stream::Stdout => Box::new(WriteSink {
                writer: tokio::io::stdout(),
            }),
            Stream::Stderr => Box::new(WriteSink {
                writer: tokio::io::stderr(),
            }),
        };

        Ok((sink, futures::future::ok(()).boxed()))
    }
}

struct WriteSink<T> {
    writer: T,
}

#[async_trait]
impl<T> StreamSink for WriteSink<T>
where
    T: tokio::io::AsyncWrite + Send + Sync + Unpin,
{
    async fn run(mut self: Box<Self>, mut input: BoxStream<'_, Observation>) -> Result<(), ()> {
        while let Some(observation) = input.next().await {
            let mut buf = match serde_json::to_vec(&observation) {
                Ok(buf) => buf,
                Err(err) => {
                    warn!(message = "Encode observation failed, dropping it", %err);
                    continue;
                }
            };
            buf.push(b'\n');

            if let Err(err) = self.writer.write_all(&buf).await {
                error!(
                    message = "Write observation to output failed, stopping sink",
                    %err
                );

                return Err(());
            }

            // tokio's stdout/stderr buffer internally, so push every line out
            // right away.
            if let Err(err) = self.writer.flush().await {
                error!(message = "Flush output failed, stopping sink", %err);

                return Err(());
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::io::Result;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use std::task::{Context, Poll};

    use chrono::{TimeZone, Utc};
    use futures::StreamExt;

    use super::*;
    use crate::event::ErrorKind;

    #[derive(Clone, Default)]
    struct Capture(Arc<Mutex<Vec<u8>>>);

    impl Capture {
        fn into_string(self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl tokio::io::AsyncWrite for Capture {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<Result<usize>> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Poll::Ready(Ok(buf.len()))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[tokio::test]
    async fn writes_one_json_line_per_observation() {
        let observed_at = Utc.with_ymd_and_hms(2024, 5, 2, 9, 30, 0).unwrap();
        let observations = vec![
            Observation::data(
                "coredns",
                "kube-system",
                BTreeMap::from([("Corefile".to_string(), ".:53 {}".to_string())]),
                observed_at,
            ),
            Observation::error("missing", "default", ErrorKind::NotFound, observed_at),
        ];

        let capture = Capture::default();
        let sink = Box::new(WriteSink {
            writer: capture.clone(),
        });
        sink.run(futures::stream::iter(observations).boxed())
            .await
            .unwrap();

        let written = capture.into_string();
        let lines = written.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), 2);

        let first = serde_json::from_str::<serde_json::Value>(lines[0]).unwrap();
        assert_eq!(first["name"], "coredns");
        assert_eq!(first["status"], "success");
        assert_eq!(first["data"]["Corefile"], ".:53 {}");

        let second = serde_json::from_str::<serde_json::Value>(lines[1]).unwrap();
        assert_eq!(second["status"], "failure");
        assert_eq!(second["error"], "not_found");
    }
}
