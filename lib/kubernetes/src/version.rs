use serde::Deserialize;

/// Version info reported by the API server's `/version` endpoint.
#[derive(Debug, Deserialize)]
pub struct Version {
    /// Major version of the ApiServer
    pub major: String,

    /// Minor version of the ApiServer
    pub minor: String,

    /// Semantic version, e.g. "v1.31.2"
    #[serde(rename = "gitVersion")]
    pub git_version: String,

    pub platform: String,
}
