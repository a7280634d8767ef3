//! Operation tracking
//!
//! Background tasks on the daemon are exposed as operations. Anything that
//! receives an `async` envelope and wants synchronous semantics goes through
//! [`Operation::wait_for_operation`]: fetch, wait until terminal, fetch again
//! so the caller sees the post-completion metadata.

use crate::error::{Error, Result};
use crate::lxd::client::Client;
use crate::lxd::envelope::{null_as_default, Envelope};
use crate::lxd::path::ApiPath;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::HashMap;

/// Status of an operation
///
/// `Pending -> Running -> {Success | Failure | Cancelled}`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Pending,
    Running,
    Success,
    Failure,
    Cancelled,
}

impl OperationStatus {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" | "created" => Some(Self::Pending),
            "running" | "started" | "starting" | "cancelling" | "stopping" | "freezing"
            | "frozen" | "thawed" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failure" | "error" => Some(Self::Failure),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Map the numeric `status_code` mirror.
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            100 | 105 => Some(Self::Pending),
            101..=112 => Some(Self::Running),
            200 => Some(Self::Success),
            400 => Some(Self::Failure),
            401 => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Running => "Running",
            Self::Success => "Success",
            Self::Failure => "Failure",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server representation of an operation. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub class: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub description: String,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub updated_at: Option<DateTime<Utc>>,
    /// Absent on some legacy daemons
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub status_code: Option<i64>,
    #[serde(default)]
    pub resources: Option<HashMap<String, Vec<String>>>,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default, deserialize_with = "null_as_default")]
    pub may_cancel: bool,
    #[serde(default, deserialize_with = "null_as_default")]
    pub err: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub location: String,
}

fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.and_then(|s| {
        DateTime::parse_from_rfc3339(&s)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }))
}

/// A daemon operation bound to the client that fetched it
#[derive(Debug, Clone)]
pub struct Operation {
    record: OperationRecord,
    client: Client,
}

impl Operation {
    /// Reduce `id`, `/1.0/operations/<id>` or `/1.0/operations/<id>?project=x`
    /// to the bare id.
    pub fn normalize_id(id_or_path: &str) -> String {
        let path = ApiPath::parse(id_or_path);
        path.last_segment()
            .map(str::to_string)
            .unwrap_or_else(|| id_or_path.to_string())
    }

    fn path(id: &str) -> ApiPath {
        ApiPath::collection("operations").join(id)
    }

    /// Fetch an operation by id or path.
    pub async fn get(client: &Client, id_or_path: &str) -> Result<Self> {
        let id = Self::normalize_id(id_or_path);
        let envelope = client.get(&Self::path(&id)).await?;
        Self::from_metadata(client, envelope.metadata, &id)
    }

    fn from_metadata(client: &Client, metadata: Value, id: &str) -> Result<Self> {
        let mut record: OperationRecord = serde_json::from_value(metadata)?;
        if record.id.is_empty() {
            record.id = id.to_string();
        }
        Ok(Self {
            record,
            client: client.clone(),
        })
    }

    /// Fetch, wait for completion, then fetch the final representation.
    pub async fn wait_for_operation(client: &Client, id_or_path: &str) -> Result<Self> {
        let operation = Self::get(client, id_or_path).await?;
        operation.wait().await?;
        Self::get(client, &operation.record.id).await
    }

    /// Follow an envelope: `async` + `wait` routes through
    /// [`Operation::wait_for_operation`]; everything else passes through.
    pub async fn resolve(client: &Client, envelope: &Envelope, wait: bool) -> Result<Option<Self>> {
        if !(envelope.is_async() && wait) {
            return Ok(None);
        }
        let id = envelope.operation_id().ok_or_else(|| {
            Error::UnexpectedResponse("async response without an operation".into())
        })?;
        Self::wait_for_operation(client, &id).await.map(Some)
    }

    /// Block until the operation reaches a terminal state.
    ///
    /// Long-polls `/wait?timeout=N`; daemons without that endpoint are
    /// short-polled with the client's bounded interval, and a long poll that
    /// times out on the daemon side is followed by a plain fetch. A Failure
    /// or Cancelled outcome becomes [`Error::OperationFailed`].
    pub async fn wait(&self) -> Result<()> {
        let id = self.record.id.as_str();
        let interval = self.client.poll_interval();
        let mut long_poll = true;
        let mut warned_missing_status = false;

        loop {
            let record = if long_poll {
                let wait = self.client.operation_wait();
                let path = Self::path(id)
                    .join("wait")
                    .query("timeout", wait.as_secs().to_string());
                match self.client.get_long_poll(&path, wait).await {
                    Ok(envelope) => serde_json::from_value::<OperationRecord>(envelope.metadata)?,
                    Err(Error::Api { status: 405 | 501, .. }) => {
                        tracing::debug!(operation = %id, "Wait endpoint unsupported, polling");
                        long_poll = false;
                        continue;
                    }
                    Err(e) if is_wait_timeout(&e) => {
                        tracing::debug!(operation = %id, error = %e, "Wait timed out, re-checking");
                        let envelope = self.client.get(&Self::path(id)).await?;
                        serde_json::from_value::<OperationRecord>(envelope.metadata)?
                    }
                    Err(e) => return Err(e),
                }
            } else {
                let envelope = self.client.get(&Self::path(id)).await?;
                serde_json::from_value::<OperationRecord>(envelope.metadata)?
            };

            match status_of(&record) {
                Some(OperationStatus::Success) => {
                    tracing::debug!(operation = %id, "Operation succeeded");
                    return Ok(());
                }
                Some(status @ (OperationStatus::Failure | OperationStatus::Cancelled)) => {
                    let message = if record.err.is_empty() {
                        status.to_string()
                    } else {
                        record.err
                    };
                    return Err(Error::OperationFailed {
                        id: id.to_string(),
                        message,
                    });
                }
                Some(_) => {}
                None => {
                    // Legacy daemon: no status at all. Assume still running.
                    if !warned_missing_status {
                        tracing::warn!(operation = %id, "Operation response has no status, polling");
                        warned_missing_status = true;
                    }
                    long_poll = false;
                }
            }

            tokio::time::sleep(interval).await;
        }
    }

    /// Re-fetch this operation.
    pub async fn refresh(&mut self) -> Result<()> {
        let fresh = Self::get(&self.client, &self.record.id).await?;
        self.record = fresh.record;
        Ok(())
    }

    /// Cancel the operation, if the daemon allows it.
    pub async fn cancel(&self) -> Result<()> {
        if !self.record.may_cancel {
            return Err(Error::InvalidArgument(format!(
                "operation {} cannot be cancelled",
                self.record.id
            )));
        }
        self.client.delete(&Self::path(&self.record.id)).await?;
        Ok(())
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    /// Status, derived from `status_code` when the name is missing.
    pub fn status(&self) -> Option<OperationStatus> {
        status_of(&self.record)
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_some_and(|s| s.is_terminal())
    }

    pub fn metadata(&self) -> &Value {
        &self.record.metadata
    }

    pub fn err(&self) -> Option<&str> {
        Some(self.record.err.as_str()).filter(|e| !e.is_empty())
    }

    pub fn may_cancel(&self) -> bool {
        self.record.may_cancel
    }

    /// Related entities by type, e.g. `instances -> [/1.0/instances/c1]`
    pub fn resources(&self) -> HashMap<String, Vec<String>> {
        self.record.resources.clone().unwrap_or_default()
    }

    pub fn record(&self) -> &OperationRecord {
        &self.record
    }
}

/// A long poll that ran out of time rather than a failed operation.
fn is_wait_timeout(err: &Error) -> bool {
    match err {
        Error::Api { status: 504, .. } => true,
        Error::Api { status: 500, message, .. } => {
            let message = message.to_lowercase();
            message.contains("deadline") || message.contains("timeout") || message.contains("timed out")
        }
        Error::Http(e) => e.is_timeout(),
        _ => false,
    }
}

fn status_of(record: &OperationRecord) -> Option<OperationStatus> {
    record
        .status
        .as_deref()
        .and_then(OperationStatus::from_str)
        .or_else(|| record.status_code.and_then(OperationStatus::from_code))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_normalize_id() {
        assert_eq!(Operation::normalize_id("abc"), "abc");
        assert_eq!(Operation::normalize_id("/1.0/operations/abc"), "abc");
        assert_eq!(
            Operation::normalize_id("/1.0/operations/abc?project=default"),
            "abc"
        );
    }

    #[test]
    fn test_status_falls_back_to_code() {
        let record: OperationRecord =
            serde_json::from_value(json!({"id": "x", "status_code": 400})).unwrap();
        assert_eq!(status_of(&record), Some(OperationStatus::Failure));

        let record: OperationRecord = serde_json::from_value(json!({"id": "x"})).unwrap();
        assert_eq!(status_of(&record), None);
    }

    #[test]
    fn test_record_tolerates_unknown_fields_and_bad_timestamps() {
        let record: OperationRecord = serde_json::from_value(json!({
            "id": "x",
            "status": "Running",
            "created_at": "2024-05-01T10:00:00.123456789Z",
            "updated_at": "not a date",
            "shiny_new_field": {"a": 1}
        }))
        .unwrap();
        assert!(record.created_at.is_some());
        assert!(record.updated_at.is_none());
        assert_eq!(status_of(&record), Some(OperationStatus::Running));
    }

    #[test]
    fn test_record_tolerates_explicit_nulls() {
        let record: OperationRecord = serde_json::from_value(json!({
            "id": "x",
            "class": null,
            "description": null,
            "status": "Success",
            "status_code": null,
            "resources": null,
            "metadata": null,
            "may_cancel": null,
            "err": null,
            "location": null,
            "created_at": null
        }))
        .unwrap();
        assert_eq!(status_of(&record), Some(OperationStatus::Success));
        assert!(record.err.is_empty());
        assert!(!record.may_cancel);
        assert!(record.created_at.is_none());
    }

    #[test]
    fn test_wait_timeout_classification() {
        let gateway = Error::Api {
            status: 504,
            message: "Gateway Timeout".into(),
            body: String::new(),
        };
        let deadline = Error::Api {
            status: 500,
            message: "context deadline exceeded".into(),
            body: String::new(),
        };
        let broken = Error::Api {
            status: 500,
            message: "Failed to create instance".into(),
            body: String::new(),
        };
        assert!(is_wait_timeout(&gateway));
        assert!(is_wait_timeout(&deadline));
        assert!(!is_wait_timeout(&broken));
        assert!(!is_wait_timeout(&Error::Unbound));
    }

    #[test]
    fn test_terminal_states() {
        assert!(OperationStatus::Success.is_terminal());
        assert!(OperationStatus::Cancelled.is_terminal());
        assert!(!OperationStatus::Pending.is_terminal());
        assert_eq!(OperationStatus::from_str("Cancelling"), Some(OperationStatus::Running));
    }
}
