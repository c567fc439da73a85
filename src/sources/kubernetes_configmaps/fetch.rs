use std::collections::BTreeMap;

use async_trait::async_trait;
use http::StatusCode;
use kubernetes::{Client, ConfigMap};

use crate::config::Target;
use crate::event::ErrorKind;

/// A single ConfigMap fetch.
///
/// Implementations must not retry internally. Every failure is mapped to an
/// [`ErrorKind`] so one bad target can never take down a poll.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, target: &Target) -> Result<BTreeMap<String, String>, ErrorKind>;
}

pub struct KubernetesFetcher {
    client: Client,
}

impl KubernetesFetcher {
    pub const fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetch for KubernetesFetcher {
    async fn fetch(&self, target: &Target) -> Result<BTreeMap<String, String>, ErrorKind> {
        match self
            .client
            .get::<ConfigMap>(&target.namespace, &target.name)
            .await
        {
            Ok(configmap) => Ok(configmap.data),
            Err(err) => Err(classify(&err)),
        }
    }
}

fn classify(err: &kubernetes::Error) -> ErrorKind {
    match err.status() {
        Some(StatusCode::NOT_FOUND) => ErrorKind::NotFound,
        Some(StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) => ErrorKind::Unauthorized,
        _ => ErrorKind::Unavailable,
    }
}
