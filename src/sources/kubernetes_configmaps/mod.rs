mod fetch;

pub use fetch::{Fetch, KubernetesFetcher};

use std::time::Duration;

use chrono::Utc;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::time::{Instant, MissedTickBehavior, interval_at, timeout};
use tracing::{debug, error, info, warn};

use crate::config::{Config, Target};
use crate::event::{ErrorKind, Observation};
use crate::pipeline::Pipeline;
use crate::shutdown::ShutdownSignal;
use crate::sources::Source;

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub async fn build(
    config: &Config,
    shutdown: ShutdownSignal,
    output: Pipeline,
) -> crate::Result<Source> {
    let kube_config = match &config.kubernetes.kubeconfig {
        Some(path) => kubernetes::Config::from_kubeconfig(path)?,
        None => kubernetes::Config::load()?,
    };
    let client = kubernetes::Client::new(kube_config);

    // The probe is informational only, an apiserver that is down right now
    // might well be back before the first poll.
    match timeout(VERSION_PROBE_TIMEOUT, client.version()).await {
        Ok(Ok(version)) => info!(
            message = "Connected to kubernetes apiserver",
            version = %version.git_version
        ),
        Ok(Err(err)) => warn!(message = "Probe kubernetes apiserver failed", %err),
        Err(_elapsed) => warn!(message = "Probe kubernetes apiserver timed out"),
    }

    let poller = Poller {
        targets: config.targets().into_iter().collect(),
        interval: config.interval,
        timeout: config.timeout,
        concurrency: config.concurrency,
        fetcher: KubernetesFetcher::new(client),
    };

    Ok(poller.run(shutdown, output).boxed())
}

struct Poller<F> {
    targets: Vec<Target>,
    interval: Duration,
    timeout: Duration,
    concurrency: usize,
    fetcher: F,
}

impl<F: Fetch + 'static> Poller<F> {
    /// Polls every target once per interval until shutdown.
    ///
    /// The first poll happens one full interval after start. Polls never
    /// overlap, a poll that runs long delays the next one instead. Shutdown
    /// is honored between polls only, so a poll already in flight always
    /// completes and is reported.
    async fn run(self, mut shutdown: ShutdownSignal, mut output: Pipeline) -> Result<(), ()> {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            message = "Polling configmaps",
            targets = self.targets.len(),
            interval = ?self.interval
        );

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => break,
                _ = ticker.tick() => {}
            }

            let limit = self.timeout;
            let fetcher = &self.fetcher;

            // Sliding window over the targets, at most `concurrency` fetches
            // in flight. Each observation is handed over as soon as its fetch
            // settles, a slow target never holds back the others.
            let mut pending = self.targets.iter();
            let mut inflight = pending
                .by_ref()
                .take(self.concurrency)
                .map(|target| fetch_target(fetcher, target, limit))
                .collect::<FuturesUnordered<_>>();

            while let Some(observation) = inflight.next().await {
                if let Some(target) = pending.next() {
                    inflight.push(fetch_target(fetcher, target, limit));
                }

                if output.send(observation).await.is_err() {
                    error!(message = "Output pipeline closed unexpectedly, stopping");

                    return Err(());
                }
            }
        }

        Ok(())
    }
}

async fn fetch_target<F: Fetch>(fetcher: &F, target: &Target, limit: Duration) -> Observation {
    match timeout(limit, fetcher.fetch(target)).await {
        Ok(Ok(data)) => {
            debug!(
                message = "Fetched configmap",
                namespace = %target.namespace,
                name = %target.name,
                keys = data.len()
            );

            Observation::data(&target.name, &target.namespace, data, Utc::now())
        }
        Ok(Err(kind)) => {
            warn!(
                message = "Fetch configmap failed",
                namespace = %target.namespace,
                name = %target.name,
                error = %kind
            );

            Observation::error(&target.name, &target.namespace, kind, Utc::now())
        }
        Err(_elapsed) => {
            warn!(
                message = "Fetch configmap timed out",
                namespace = %target.namespace,
                name = %target.name,
                timeout = ?limit
            );

            Observation::error(&target.name, &target.namespace, ErrorKind::Timeout, Utc::now())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::{Arc, Mutex};
    use std::task::Poll;

    use futures::future::BoxFuture;
    use tokio::time::{advance, sleep};
    use tokio_stream::wrappers::ReceiverStream;

    use super::*;

    #[derive(Clone)]
    enum Behavior {
        Data(BTreeMap<String, String>),
        Fail(ErrorKind),
        /// Sleeps before answering, every time.
        Slow(Duration),
        /// Sleeps before answering on the first call only.
        SlowOnce(Duration),
    }

    #[derive(Clone, Default)]
    struct MockFetch {
        plan: Arc<Mutex<HashMap<String, Behavior>>>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl MockFetch {
        fn set(&self, name: &str, behavior: Behavior) {
            self.plan
                .lock()
                .unwrap()
                .insert(name.to_string(), behavior);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl Fetch for MockFetch {
        async fn fetch(&self, target: &Target) -> Result<BTreeMap<String, String>, ErrorKind> {
            self.calls.lock().unwrap().push(target.name.clone());

            let behavior = {
                let mut plan = self.plan.lock().unwrap();
                let behavior = plan.get(&target.name).cloned();
                if let Some(Behavior::SlowOnce(_)) = &behavior {
                    plan.insert(target.name.clone(), Behavior::Data(Default::default()));
                }

                behavior
            };

            match behavior {
                None => Ok(Default::default()),
                Some(Behavior::Data(data)) => Ok(data),
                Some(Behavior::Fail(kind)) => Err(kind),
                Some(Behavior::Slow(delay)) | Some(Behavior::SlowOnce(delay)) => {
                    sleep(delay).await;
                    Ok(Default::default())
                }
            }
        }
    }

    fn target(name: &str, namespace: &str) -> Target {
        Target {
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    struct Harness {
        run: BoxFuture<'static, Result<(), ()>>,
        rx: ReceiverStream<Observation>,
        trigger: crate::shutdown::Trigger,
    }

    fn harness(targets: Vec<Target>, concurrency: usize, fetcher: MockFetch) -> Harness {
        let (trigger, shutdown, _done) = ShutdownSignal::new_wired();
        let (pipeline, rx) = Pipeline::new_test();

        let poller = Poller {
            targets,
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(15),
            concurrency,
            fetcher,
        };

        Harness {
            run: poller.run(shutdown, pipeline).boxed(),
            rx,
            trigger,
        }
    }

    async fn drain(rx: &mut ReceiverStream<Observation>) -> Vec<Observation> {
        let mut observations = Vec::new();
        while let Poll::Ready(Some(observation)) = futures::poll!(rx.next()) {
            observations.push(observation);
        }

        observations
    }

    #[tokio::test(start_paused = true)]
    async fn first_poll_waits_one_full_interval() {
        let fetcher = MockFetch::default();
        let mut harness = harness(vec![target("coredns", "kube-system")], 4, fetcher);

        assert!(futures::poll!(&mut harness.run).is_pending());

        advance(Duration::from_secs(59)).await;
        assert!(futures::poll!(&mut harness.run).is_pending());
        assert!(drain(&mut harness.rx).await.is_empty());

        advance(Duration::from_secs(1)).await;
        assert!(futures::poll!(&mut harness.run).is_pending());

        let observations = drain(&mut harness.rx).await;
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].name, "coredns");
        assert!(observations[0].is_success());
    }

    #[tokio::test(start_paused = true)]
    async fn every_target_reported_once_per_poll() {
        let fetcher = MockFetch::default();
        fetcher.set(
            "coredns",
            Behavior::Data(BTreeMap::from([("k".to_string(), "v".to_string())])),
        );
        fetcher.set("missing", Behavior::Fail(ErrorKind::NotFound));
        fetcher.set("denied", Behavior::Fail(ErrorKind::Unauthorized));

        let targets = vec![
            target("coredns", "kube-system"),
            target("missing", "default"),
            target("denied", "default"),
        ];
        let mut harness = harness(targets, 2, fetcher);

        assert!(futures::poll!(&mut harness.run).is_pending());
        advance(Duration::from_secs(60)).await;
        assert!(futures::poll!(&mut harness.run).is_pending());

        let observations = drain(&mut harness.rx).await;
        assert_eq!(observations.len(), 3);

        let by_name = observations
            .iter()
            .map(|observation| (observation.name.as_str(), observation))
            .collect::<HashMap<_, _>>();
        assert!(by_name["coredns"].is_success());
        assert_eq!(by_name["missing"].error_kind(), Some(ErrorKind::NotFound));
        assert_eq!(
            by_name["denied"].error_kind(),
            Some(ErrorKind::Unauthorized)
        );

        // a second poll reports every target again
        advance(Duration::from_secs(60)).await;
        assert!(futures::poll!(&mut harness.run).is_pending());
        assert_eq!(drain(&mut harness.rx).await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out_without_stalling_others() {
        let fetcher = MockFetch::default();
        fetcher.set("stuck", Behavior::Slow(Duration::from_secs(600)));

        let targets = vec![target("stuck", "default"), target("fine", "default")];
        let mut harness = harness(targets, 4, fetcher);

        assert!(futures::poll!(&mut harness.run).is_pending());
        advance(Duration::from_secs(60)).await;
        assert!(futures::poll!(&mut harness.run).is_pending());

        // the healthy target is reported right away, the stuck one is still
        // waiting on its timeout
        let observations = drain(&mut harness.rx).await;
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].name, "fine");
        assert!(observations[0].is_success());

        advance(Duration::from_secs(15)).await;
        assert!(futures::poll!(&mut harness.run).is_pending());

        let observations = drain(&mut harness.rx).await;
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].name, "stuck");
        assert_eq!(observations[0].error_kind(), Some(ErrorKind::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_while_idle_stops_without_polling() {
        let fetcher = MockFetch::default();
        let mut harness = harness(vec![target("coredns", "kube-system")], 4, fetcher.clone());

        assert!(futures::poll!(&mut harness.run).is_pending());
        advance(Duration::from_secs(30)).await;

        harness.trigger.cancel();
        assert_eq!(futures::poll!(&mut harness.run), Poll::Ready(Ok(())));

        assert!(drain(&mut harness.rx).await.is_empty());
        assert!(fetcher.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_mid_poll_completes_the_poll() {
        let fetcher = MockFetch::default();
        fetcher.set("slow", Behavior::Slow(Duration::from_secs(5)));

        // concurrency 1 forces the second target to start only after the
        // first fetch completes, well after the shutdown fires
        let targets = vec![target("slow", "default"), target("after", "default")];
        let mut harness = harness(targets, 1, fetcher.clone());

        assert!(futures::poll!(&mut harness.run).is_pending());
        advance(Duration::from_secs(60)).await;
        // now blocked on the slow fetch
        assert!(futures::poll!(&mut harness.run).is_pending());

        harness.trigger.cancel();
        assert!(futures::poll!(&mut harness.run).is_pending());

        advance(Duration::from_secs(5)).await;
        assert_eq!(futures::poll!(&mut harness.run), Poll::Ready(Ok(())));

        // both targets were fetched and reported despite the shutdown
        let observations = drain(&mut harness.rx).await;
        assert_eq!(observations.len(), 2);
        assert_eq!(fetcher.calls(), vec!["slow".to_string(), "after".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn long_poll_delays_the_next_without_bursting() {
        let fetcher = MockFetch::default();
        fetcher.set("slow-start", Behavior::SlowOnce(Duration::from_secs(130)));

        let poller = Poller {
            targets: vec![target("slow-start", "default")],
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(200),
            concurrency: 4,
            fetcher,
        };
        let (trigger, shutdown, _done) = ShutdownSignal::new_wired();
        let (pipeline, mut rx) = Pipeline::new_test();
        let mut run = poller.run(shutdown, pipeline).boxed();

        assert!(futures::poll!(&mut run).is_pending());

        // first poll starts at 60s and runs until 190s, the polls nominally
        // due at 120s and 180s must not pile up behind it
        advance(Duration::from_secs(60)).await;
        assert!(futures::poll!(&mut run).is_pending());
        advance(Duration::from_secs(120)).await;
        assert!(futures::poll!(&mut run).is_pending());
        assert!(drain(&mut rx).await.is_empty());

        // t=190s: the long poll finishes and exactly one delayed poll runs
        advance(Duration::from_secs(10)).await;
        assert!(futures::poll!(&mut run).is_pending());
        assert_eq!(drain(&mut rx).await.len(), 2);

        // the schedule restarts relative to the delayed poll
        advance(Duration::from_secs(59)).await;
        assert!(futures::poll!(&mut run).is_pending());
        assert!(drain(&mut rx).await.is_empty());

        advance(Duration::from_secs(1)).await;
        assert!(futures::poll!(&mut run).is_pending());
        assert_eq!(drain(&mut rx).await.len(), 1);

        trigger.cancel();
        assert_eq!(futures::poll!(&mut run), Poll::Ready(Ok(())));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_target_list_polls_quietly() {
        let fetcher = MockFetch::default();
        let mut harness = harness(Vec::new(), 4, fetcher);

        assert!(futures::poll!(&mut harness.run).is_pending());
        advance(Duration::from_secs(120)).await;
        assert!(futures::poll!(&mut harness.run).is_pending());
        assert!(drain(&mut harness.rx).await.is_empty());

        harness.trigger.cancel();
        assert_eq!(futures::poll!(&mut harness.run), Poll::Ready(Ok(())));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_pipeline_stops_the_source() {
        let fetcher = MockFetch::default();
        let mut harness = harness(vec![target("coredns", "kube-system")], 4, fetcher);

        drop(harness.rx);

        assert!(futures::poll!(&mut harness.run).is_pending());
        advance(Duration::from_secs(60)).await;
        assert_eq!(futures::poll!(&mut harness.run), Poll::Ready(Err(())));
    }
}
