use serde::{Deserialize, Serialize};

fn default_queue() -> String {
    "default".to_string()
}

fn default_retry() -> u32 {
    25
}

/// A unit of work as submitted by a client and stored in the queues.
///
/// The `args` payload is arbitrary JSON and is carried through untouched.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub jid: String,
    #[serde(default = "default_queue")]
    pub queue: String,
    pub jobtype: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enqueued_at: Option<String>,
    /// If set to a future time, the job is parked in the scheduled set and
    /// enqueued when due instead of immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at: Option<String>,
    /// Retry budget. 0 means a single failure sends the job to the dead set.
    #[serde(default = "default_retry")]
    pub retry: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<Failure>,
}

/// Bookkeeping attached to a job once it has failed at least once.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub retry_count: u32,
    pub failed_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errtype: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backtrace: Vec<String>,
}

/// An in-flight job held by a worker, stored in the working set keyed by
/// `expires_at`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub job: Job,
    pub wid: String,
    pub reserved_at: String,
    pub expires_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_defaults() {
        let job: Job = serde_json::from_str(r#"{"jid":"j1","jobtype":"T"}"#).unwrap();
        assert_eq!(job.queue, "default");
        assert_eq!(job.retry, 25);
        assert!(job.args.is_null());
        assert!(job.at.is_none());
        assert!(job.failure.is_none());
    }

    #[test]
    fn test_job_requires_jid_and_jobtype() {
        assert!(serde_json::from_str::<Job>(r#"{"jobtype":"T"}"#).is_err());
        assert!(serde_json::from_str::<Job>(r#"{"jid":"j1"}"#).is_err());
    }

    #[test]
    fn test_args_preserved_verbatim() {
        let src = r#"{"jid":"j1","jobtype":"T","args":[1,{"k":"v"},null]}"#;
        let job: Job = serde_json::from_str(src).unwrap();
        let round: Job = serde_json::from_slice(&serde_json::to_vec(&job).unwrap()).unwrap();
        assert_eq!(job.args, round.args);
        assert_eq!(round.args, serde_json::json!([1, {"k": "v"}, null]));
    }

    #[test]
    fn test_retry_zero_survives_round_trip() {
        let job: Job = serde_json::from_str(r#"{"jid":"j1","jobtype":"T","retry":0}"#).unwrap();
        assert_eq!(job.retry, 0);
        let round: Job = serde_json::from_slice(&serde_json::to_vec(&job).unwrap()).unwrap();
        assert_eq!(round.retry, 0);
    }
}
