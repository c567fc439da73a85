use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};
use serde::ser::{Serialize, SerializeStruct, Serializer};

/// Classification of a failed fetch, coarse enough to stay stable across
/// apiserver versions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// The object does not exist.
    NotFound,
    /// The credentials were rejected or are insufficient.
    Unauthorized,
    /// The apiserver could not be reached or answered abnormally.
    Unavailable,
    /// The fetch did not complete within its deadline.
    Timeout,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::Timeout => "timeout",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
    Data(BTreeMap<String, String>),
    Error(ErrorKind),
}

/// One attempt at one target within one tick. Either the object's current
/// data or the reason it could not be read, never both.
#[derive(Clone, Debug, PartialEq)]
pub struct Observation {
    pub name: String,
    pub namespace: String,
    pub observed_at: DateTime<Utc>,
    pub outcome: Outcome,
}

impl Observation {
    pub fn data(
        name: impl Into<String>,
        namespace: impl Into<String>,
        data: BTreeMap<String, String>,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Observation {
            name: name.into(),
            namespace: namespace.into(),
            observed_at,
            outcome: Outcome::Data(data),
        }
    }

    pub fn error(
        name: impl Into<String>,
        namespace: impl Into<String>,
        kind: ErrorKind,
        observed_at: DateTime<Utc>,
    ) -> Self {
        Observation {
            name: name.into(),
            namespace: namespace.into(),
            observed_at,
            outcome: Outcome::Error(kind),
        }
    }

    pub const fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Data(_))
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            Outcome::Data(_) => None,
            Outcome::Error(kind) => Some(*kind),
        }
    }
}

// Flatten into the record downstream consumers see, with `data` only on
// success and `error` only on failure.
impl Serialize for Observation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Observation", 5)?;
        state.serialize_field("name", &self.name)?;
        state.serialize_field("namespace", &self.namespace)?;

        match &self.outcome {
            Outcome::Data(data) => {
                state.serialize_field("status", "success")?;
                state.serialize_field("data", data)?;
            }
            Outcome::Error(kind) => {
                state.serialize_field("status", "failure")?;
                state.serialize_field("error", kind.as_str())?;
            }
        }

        state.serialize_field("observed_at", &self.observed_at)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 2, 9, 30, 0).unwrap()
    }

    #[test]
    fn serialize_success() {
        let observation = Observation::data(
            "app-config",
            "ns-a",
            BTreeMap::from([("k".to_string(), "v".to_string())]),
            timestamp(),
        );

        let value = serde_json::to_value(&observation).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "app-config",
                "namespace": "ns-a",
                "status": "success",
                "data": {"k": "v"},
                "observed_at": "2024-05-02T09:30:00Z",
            })
        );
    }

    #[test]
    fn serialize_failure() {
        let observation =
            Observation::error("feature-flags", "ns-b", ErrorKind::NotFound, timestamp());

        let value = serde_json::to_value(&observation).unwrap();
        assert_eq!(
            value,
            json!({
                "name": "feature-flags",
                "namespace": "ns-b",
                "status": "failure",
                "error": "not_found",
                "observed_at": "2024-05-02T09:30:00Z",
            })
        );
    }

    #[test]
    fn outcome_accessors() {
        let ok = Observation::data("a", "b", BTreeMap::new(), timestamp());
        assert!(ok.is_success());
        assert_eq!(ok.error_kind(), None);

        let failed = Observation::error("a", "b", ErrorKind::Timeout, timestamp());
        assert!(!failed.is_success());
        assert_eq!(failed.error_kind(), Some(ErrorKind::Timeout));
    }
}
