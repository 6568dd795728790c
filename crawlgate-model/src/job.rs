use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ModelError, Result};

/// Job payload as submitted by a producer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSubmission {
    pub id: String,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub listenable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_channel_id: Option<String>,
}

impl JobSubmission {
    pub fn new(id: impl Into<String>, priority: i32) -> Self {
        Self {
            id: id.into(),
            data: serde_json::Value::Null,
            priority,
            listenable: false,
            listen_channel_id: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }
}

/// A job as stored in the queue.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedJob {
    pub id: String,
    pub data: serde_json::Value,
    pub priority: i32,
    pub listenable: bool,
    /// Unix epoch milliseconds.
    pub created_at: i64,
    /// Unix epoch milliseconds; `None` means the job never expires while queued.
    #[serde(default)]
    pub times_out_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen_channel_id: Option<String>,
    #[serde(default)]
    pub crawl_id: Option<String>,
    pub team_id: String,
}

impl QueuedJob {
    pub fn queue_key(&self) -> QueueKey {
        QueueKey {
            team_id: self.team_id.clone(),
            priority: self.priority,
            created_at: self.created_at,
            job_id: self.id.clone(),
        }
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        self.times_out_at.is_some_and(|at| at < now_ms)
    }
}

/// A job that a worker has won the claim for.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimedJob {
    pub job: QueuedJob,
    /// Opaque handle required to complete the job.
    pub queue_key: String,
    /// Owner of the claim; needed to renew it while the job runs.
    #[serde(default)]
    pub worker_id: String,
}

/// Position of a job inside its team queue.
///
/// Field order defines the serving order: priority, then creation time, then
/// job id. The wire form is an opaque URL-safe base64 token.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueKey {
    pub team_id: String,
    pub priority: i32,
    pub created_at: i64,
    pub job_id: String,
}

impl QueueKey {
    pub fn encode(&self) -> String {
        let team = self.team_id.as_bytes();
        let mut buf = Vec::with_capacity(4 + team.len() + 12 + self.job_id.len());
        buf.extend_from_slice(&(team.len() as u32).to_be_bytes());
        buf.extend_from_slice(team);
        buf.extend_from_slice(&self.priority.to_be_bytes());
        buf.extend_from_slice(&self.created_at.to_be_bytes());
        buf.extend_from_slice(self.job_id.as_bytes());
        URL_SAFE_NO_PAD.encode(buf)
    }

    pub fn decode(token: &str) -> Result<Self> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|e| ModelError::InvalidQueueKey(e.to_string()))?;

        let truncated = || ModelError::InvalidQueueKey("truncated key".into());

        let len_bytes: [u8; 4] = bytes
            .get(0..4)
            .ok_or_else(truncated)?
            .try_into()
            .map_err(|_| truncated())?;
        let team_len = u32::from_be_bytes(len_bytes) as usize;
        let team_end = 4 + team_len;
        let team = bytes.get(4..team_end).ok_or_else(truncated)?;

        let prio_bytes: [u8; 4] = bytes
            .get(team_end..team_end + 4)
            .ok_or_else(truncated)?
            .try_into()
            .map_err(|_| truncated())?;
        let created_bytes: [u8; 8] = bytes
            .get(team_end + 4..team_end + 12)
            .ok_or_else(truncated)?
            .try_into()
            .map_err(|_| truncated())?;
        let job = &bytes[team_end + 12..];

        if job.is_empty() {
            return Err(ModelError::InvalidQueueKey("missing job id".into()));
        }

        let utf8 = |raw: &[u8]| {
            String::from_utf8(raw.to_vec())
                .map_err(|e| ModelError::InvalidQueueKey(e.to_string()))
        };

        Ok(Self {
            team_id: utf8(team)?,
            priority: i32::from_be_bytes(prio_bytes),
            created_at: i64::from_be_bytes(created_bytes),
            job_id: utf8(job)?,
        })
    }
}

impl fmt::Display for QueueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(priority: i32, created_at: i64, job: &str) -> QueueKey {
        QueueKey {
            team_id: "team-a".into(),
            priority,
            created_at,
            job_id: job.into(),
        }
    }

    #[test]
    fn queue_key_token_decodes_to_same_position() {
        let original = key(-3, 1_700_000_000_123, "job:ü-1");
        let decoded = QueueKey::decode(&original.encode()).expect("decodes");
        assert_eq!(decoded, original);
    }

    #[test]
    fn queue_key_rejects_garbage() {
        assert!(QueueKey::decode("not base64 !!").is_err());
        assert!(QueueKey::decode(&URL_SAFE_NO_PAD.encode([0, 0, 0, 9, 1])).is_err());
    }

    #[test]
    fn queue_keys_order_by_priority_then_creation() {
        let mut keys = vec![key(5, 10, "c"), key(1, 20, "b"), key(1, 10, "z"), key(1, 10, "a")];
        keys.sort();
        let ids: Vec<_> = keys.iter().map(|k| k.job_id.as_str()).collect();
        assert_eq!(ids, ["a", "z", "b", "c"]);
    }

    #[test]
    fn submission_uses_camel_case_on_the_wire() {
        let raw = r#"{"id":"j1","priority":2,"listenable":true,"listenChannelId":"ch"}"#;
        let job: JobSubmission = serde_json::from_str(raw).expect("parses");
        assert_eq!(job.listen_channel_id.as_deref(), Some("ch"));
        assert!(job.data.is_null());
    }
}
