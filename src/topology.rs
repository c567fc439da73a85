use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, future};
use tokio::time::{Duration, Instant, timeout_at};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::event::Observation;
use crate::pipeline::Pipeline;
use crate::shutdown::{ShutdownCoordinator, Tripwire};
use crate::sinks::Sink;
use crate::sources;

const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(60);

type TaskHandle = tokio::task::JoinHandle<Result<(), ()>>;

/// Builds every piece of the topology without running anything. The sink is
/// built and healthchecked, the kubernetes client is constructed and the
/// poller is assembled. Every failure here is a startup error, after `Ok`
/// nothing but the sink going away can stop the agent.
pub async fn build(config: Config) -> crate::Result<Topology> {
    let (sink, health_check) = config.sink.build().await?;
    if let Err(err) = health_check.await {
        error!(message = "Sink healthcheck failed", %err);

        return Err(err);
    }
    debug!(message = "Sink healthcheck passed");

    let mut shutdown_coordinator = ShutdownCoordinator::default();
    let (shutdown_signal, force_tripwire) = shutdown_coordinator.register_source();

    let (pipeline, receiver) = Pipeline::new();
    let source = sources::kubernetes_configmaps::build(&config, shutdown_signal, pipeline).await?;

    Ok(Topology {
        config,
        source,
        force_tripwire,
        sink,
        receiver,
        shutdown_coordinator,
    })
}

pub struct Topology {
    config: Config,
    source: sources::Source,
    force_tripwire: Tripwire,
    sink: Sink,
    receiver: ReceiverStream<Observation>,
    shutdown_coordinator: ShutdownCoordinator,
}

impl Topology {
    /// Spawns the source and sink tasks. The first poll is due one full
    /// interval from here.
    pub fn start(self) -> RunningTopology {
        let sink = self.sink;
        let receiver = self.receiver;
        let sink_task = tokio::spawn(async move { sink.run(receiver.boxed()).await });

        // Racing the source against the force tripwire lets a stuck source be
        // dropped on the floor once the shutdown grace period expires.
        let source = self.source;
        let force_tripwire = self.force_tripwire;
        let source_task = tokio::spawn(async move {
            match future::try_select(source, force_tripwire.unit_error().boxed()).await {
                Ok(_) => Ok(()),
                Err(_) => Err(()),
            }
        });

        info!(
            message = "Topology is running",
            interval = ?self.config.interval,
            targets = self.config.configmaps.len()
        );

        RunningTopology {
            source_task,
            sink_task,
            shutdown_coordinator: self.shutdown_coordinator,
        }
    }
}

pub struct RunningTopology {
    source_task: TaskHandle,
    sink_task: TaskHandle,
    shutdown_coordinator: ShutdownCoordinator,
}

impl RunningTopology {
    /// Resolves once the source has stopped on its own, for example because
    /// the sink went away. Used as an additional shutdown trigger.
    pub fn sources_finished(&self) -> BoxFuture<'static, ()> {
        match self.shutdown_coordinator.sources_finished() {
            Some(tripwire) => tripwire.boxed(),
            None => future::ready(()).boxed(),
        }
    }

    /// Shut everything down, gracefully if possible.
    ///
    /// The source is told to stop and given until the grace period deadline
    /// to finish its in-flight poll, after that it is forcibly dropped. The
    /// sink then drains whatever the source managed to deliver. Taking `self`
    /// by value makes a second stop unrepresentable.
    pub async fn stop(self) {
        let deadline = Instant::now() + SHUTDOWN_GRACE_PERIOD;

        let clean = self.shutdown_coordinator.shutdown_source(deadline).await;
        match self.source_task.await {
            Ok(Ok(())) => debug!(message = "Source task finished", clean),
            Ok(Err(())) => debug!(message = "Source task finished with an error"),
            Err(err) if err.is_panic() => {
                error!(message = "Source task panicked", %err)
            }
            Err(_cancelled) => {}
        }

        // The source dropped its pipeline sender, so the sink sees the end
        // of its input stream and drains.
        let mut sink_task = self.sink_task;
        match timeout_at(deadline, &mut sink_task).await {
            Ok(Ok(Ok(()))) => debug!(message = "Sink task finished"),
            Ok(Ok(Err(()))) => debug!(message = "Sink task finished with an error"),
            Ok(Err(err)) if err.is_panic() => {
                error!(message = "Sink task panicked", %err)
            }
            Ok(Err(_cancelled)) => {}
            Err(_elapsed) => {
                error!(message = "Sink failed to drain before deadline, aborting it");

                sink_task.abort();
            }
        }
    }
}
