use std::collections::BTreeMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;

/// An accessor trait for a kubernetes Resource.
pub trait Resource: DeserializeOwned {
    /// The group of the resource, or the empty string if the resource doesn't
    /// have a group.
    const GROUP: &'static str;

    /// The version of the resource.
    const VERSION: &'static str;

    /// The plural of this resource, which is used to construct URLS
    const PLURAL: &'static str;

    /// Creates a url path for http requests for this resource
    fn url_path(namespace: Option<&str>) -> String {
        let group = if Self::GROUP.is_empty() {
            "api"
        } else {
            "apis"
        };
        let api_version = if Self::GROUP.is_empty() {
            Self::VERSION.to_string()
        } else {
            format!("{}/{}", Self::GROUP, Self::VERSION)
        };
        let namespace = match namespace {
            Some(namespace) => format!("namespaces/{}/", namespace),
            None => String::new(),
        };
        let plural = Self::PLURAL;

        format!("/{group}/{api_version}/{namespace}{plural}")
    }
}

/// Standard object metadata, the fields we actually consume.
///
/// See https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.31/#objectmeta-v1-meta
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub namespace: String,

    #[serde(default)]
    pub uid: String,

    #[serde(default, rename = "resourceVersion")]
    pub resource_version: String,

    #[serde(default, rename = "creationTimestamp")]
    pub creation_timestamp: Option<String>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// ConfigMap holds configuration data for pods to consume.
///
/// See https://kubernetes.io/docs/reference/generated/kubernetes-api/v1.31/#configmap-v1-core
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ConfigMap {
    pub metadata: ObjectMeta,

    /// UTF-8 key/value pairs. Keys under `binaryData` are not part of this
    /// mapping and are ignored here.
    #[serde(default)]
    pub data: BTreeMap<String, String>,

    /// Immutable, if set to true, ensures that data stored in the ConfigMap
    /// cannot be updated.
    #[serde(default)]
    pub immutable: bool,
}

impl Resource for ConfigMap {
    const GROUP: &'static str = "";
    const VERSION: &'static str = "v1";
    const PLURAL: &'static str = "configmaps";
}
