//! In-process job registry. Every pipeline invocation gets a `job_id`, a
//! broadcast event channel and a buffered final reply. Streamed events are
//! hints; the buffered reply is the authoritative artifact.

use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use namegnome_model::{JobEvent, JobKind, JobState, JobStatus};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug)]
pub struct JobHandle {
    pub job_id: Uuid,
    pub kind: JobKind,
    created_at: DateTime<Utc>,
    updated_at: RwLock<DateTime<Utc>>,
    state: RwLock<JobState>,
    result: RwLock<Option<serde_json::Value>>,
    error: RwLock<Option<String>>,
    sender: broadcast::Sender<JobEvent>,
}

impl JobHandle {
    fn new(kind: JobKind) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let now = Utc::now();
        Self {
            job_id: Uuid::new_v4(),
            kind,
            created_at: now,
            updated_at: RwLock::new(now),
            state: RwLock::new(JobState::Running),
            result: RwLock::new(None),
            error: RwLock::new(None),
            sender,
        }
    }

    fn touch(&self) {
        *self.updated_at.write().expect("clock lock poisoned") = Utc::now();
    }

    /// Fire-and-forget: an event with no listeners is simply dropped.
    pub fn publish(&self, event: JobEvent) {
        self.touch();
        let _ = self.sender.send(event);
    }

    pub fn progress(&self, stage: &str, completed: u64, total: u64) {
        self.publish(JobEvent::Progress {
            stage: stage.to_string(),
            completed,
            total,
            message: None,
        });
    }

    pub fn warning(&self, code: &str, message: impl Into<String>) {
        self.publish(JobEvent::Warning {
            code: code.to_string(),
            message: message.into(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }

    pub fn complete(&self, result: serde_json::Value) {
        *self.result.write().expect("result lock poisoned") = Some(result);
        *self.state.write().expect("state lock poisoned") = JobState::Completed;
        self.publish(JobEvent::Done {
            state: JobState::Completed,
        });
    }

    pub fn fail(&self, message: impl Into<String>) {
        *self.error.write().expect("error lock poisoned") = Some(message.into());
        *self.state.write().expect("state lock poisoned") = JobState::Failed;
        self.publish(JobEvent::Done {
            state: JobState::Failed,
        });
    }

    pub fn result(&self) -> Option<serde_json::Value> {
        self.result.read().expect("result lock poisoned").clone()
    }

    pub fn status(&self) -> JobStatus {
        JobStatus {
            job_id: self.job_id,
            kind: self.kind,
            state: *self.state.read().expect("state lock poisoned"),
            created_at: self.created_at,
            updated_at: *self.updated_at.read().expect("clock lock poisoned"),
            has_result: self.result.read().expect("result lock poisoned").is_some(),
            error: self.error.read().expect("error lock poisoned").clone(),
        }
    }
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<Uuid, Arc<JobHandle>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(&self, kind: JobKind) -> Arc<JobHandle> {
        let handle = Arc::new(JobHandle::new(kind));
        self.jobs.insert(handle.job_id, Arc::clone(&handle));
        handle
    }

    pub fn get(&self, job_id: &Uuid) -> Option<Arc<JobHandle>> {
        self.jobs.get(job_id).map(|entry| Arc::clone(entry.value()))
    }
}
