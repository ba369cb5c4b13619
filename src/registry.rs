//! Concurrent-safe lab store with per-lab mutual exclusion.
//!
//! The registry owns the map of labs. Each lab's mutable fields sit
//! behind that lab's own mutex; the map itself is guarded by a
//! read-write lock that is only held long enough to clone an `Arc`.
//! Readers always operate on snapshots, so no external call ever runs
//! under a lab lock.
//!
//! The pending-message queue is the single backchannel into a running
//! pipeline: the HTTP handler enqueues through the bounded sender stored
//! here, and the lab's driver task owns the receiving end.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::types::{Lab, LabOptions, LabSnapshot, LabStatus, LabSummary};

/// Registry operation errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No lab with the given id.
    #[error("lab not found: {0}")]
    NotFound(String),
    /// The lab's status does not permit the requested operation.
    #[error("lab {lab_id} is {status}; operation not permitted")]
    InvalidState {
        /// The lab in question.
        lab_id: String,
        /// Its status at the time of the call.
        status: LabStatus,
    },
    /// The lab's pending-message queue is full.
    #[error("lab {0}: pending message queue is full")]
    QueueFull(String),
}

/// One registry entry: the lab plus the sending half of its pending queue.
struct LabHandle {
    lab: Mutex<Lab>,
    messages: mpsc::Sender<String>,
}

/// Concurrent-safe storage of labs indexed by `lab_id`.
pub struct LabRegistry {
    labs: RwLock<HashMap<String, Arc<LabHandle>>>,
    queue_capacity: usize,
}

impl LabRegistry {
    /// Create an empty registry whose pending queues hold at most
    /// `queue_capacity` messages.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            labs: RwLock::new(HashMap::new()),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Install a fresh lab and return its id together with the receiving
    /// half of the pending-message queue, to be owned by the driver task.
    pub async fn create(
        &self,
        prompt: String,
        options: LabOptions,
    ) -> (String, mpsc::Receiver<String>) {
        let lab_id = Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        let handle = Arc::new(LabHandle {
            lab: Mutex::new(Lab::new(lab_id.clone(), prompt, options)),
            messages: tx,
        });

        let mut labs = self.labs.write().await;
        labs.insert(lab_id.clone(), handle);
        (lab_id, rx)
    }

    /// Return a stable copy of the lab's public fields.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown id.
    pub async fn snapshot(&self, lab_id: &str) -> Result<LabSnapshot, RegistryError> {
        let handle = self.handle(lab_id).await?;
        let lab = handle.lab.lock().await;
        Ok(LabSnapshot::from(&*lab))
    }

    /// Summaries for all labs, newest first.
    pub async fn list(&self) -> Vec<LabSummary> {
        let handles: Vec<Arc<LabHandle>> = {
            let labs = self.labs.read().await;
            labs.values().cloned().collect()
        };

        let mut summaries = Vec::with_capacity(handles.len());
        for handle in handles {
            let lab = handle.lab.lock().await;
            summaries.push(LabSummary {
                lab_id: lab.lab_id.clone(),
                title: lab.title(),
                status: lab.status,
                created_at: lab.created_at,
            });
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    /// Number of labs currently registered.
    pub async fn count(&self) -> usize {
        self.labs.read().await.len()
    }

    /// Append a user message to the lab's pending queue.
    ///
    /// Returns the lab's status at enqueue time so callers can report the
    /// conversation state.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] for an unknown id,
    /// [`RegistryError::InvalidState`] when the lab is past the Planner
    /// dialog, and [`RegistryError::QueueFull`] when the bounded queue
    /// has no room.
    pub async fn enqueue_message(
        &self,
        lab_id: &str,
        content: String,
    ) -> Result<LabStatus, RegistryError> {
        let handle = self.handle(lab_id).await?;
        let mut lab = handle.lab.lock().await;

        if !lab.status.accepts_messages() {
            return Err(RegistryError::InvalidState {
                lab_id: lab_id.to_owned(),
                status: lab.status,
            });
        }

        match handle.messages.try_send(content) {
            Ok(()) => {
                touch(&mut lab);
                Ok(lab.status)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                Err(RegistryError::QueueFull(lab_id.to_owned()))
            }
            // Receiver gone means the driver task already exited.
            Err(mpsc::error::TrySendError::Closed(_)) => Err(RegistryError::InvalidState {
                lab_id: lab_id.to_owned(),
                status: lab.status,
            }),
        }
    }

    /// Run a read-only closure under the lab's mutex.
    ///
    /// Unlike [`LabRegistry::mutate`] this never touches `updated_at`,
    /// so status reads stay side-effect-free.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown id.
    pub async fn read<R>(
        &self,
        lab_id: &str,
        f: impl FnOnce(&Lab) -> R + Send,
    ) -> Result<R, RegistryError> {
        let handle = self.handle(lab_id).await?;
        let lab = handle.lab.lock().await;
        Ok(f(&lab))
    }

    /// Apply `f` to the lab atomically under its mutex, then bump
    /// `updated_at`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown id.
    pub async fn mutate<R>(
        &self,
        lab_id: &str,
        f: impl FnOnce(&mut Lab) -> R + Send,
    ) -> Result<R, RegistryError> {
        let handle = self.handle(lab_id).await?;
        let mut lab = handle.lab.lock().await;
        let out = f(&mut lab);
        touch(&mut lab);
        Ok(out)
    }

    async fn handle(&self, lab_id: &str) -> Result<Arc<LabHandle>, RegistryError> {
        let labs = self.labs.read().await;
        labs.get(lab_id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(lab_id.to_owned()))
    }
}

/// Advance `updated_at`, strictly.
///
/// Two mutations inside one clock tick still produce increasing
/// timestamps.
fn touch(lab: &mut Lab) {
    let now = chrono::Utc::now();
    lab.updated_at = if now > lab.updated_at {
        now
    } else {
        lab.updated_at
            .checked_add_signed(chrono::Duration::microseconds(1))
            .unwrap_or(now)
    };
}
