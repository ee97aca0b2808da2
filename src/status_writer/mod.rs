//! # Status Writer
//!
//! Reconciles each DAG rebuild's per-object [`ObjectStatus`] table back onto
//! the source Kubernetes objects. Best-effort: a single write failure is
//! logged and left for the next rebuild to retry, never propagated as a
//! process failure, and nothing is persisted locally between cycles.
//!
//! The Kubernetes API client is out of scope (see DESIGN.md), so this is
//! modeled as a narrow async trait any client could implement, the same
//! shape used at other storage-repository seams in this crate.

use crate::dag::model::{Dag, ObjectStatus};
use std::sync::Mutex;
use tracing::warn;

/// A reference to the object a status condition belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub namespace: String,
    pub name: String,
}

#[derive(thiserror::Error, Debug)]
#[error("status write failed for {object_ref:?}: {message}")]
pub struct StatusWriteError {
    pub object_ref: ObjectRef,
    pub message: String,
}

/// Narrow write-back interface for one object's status condition.
///
/// Production code would implement this over the Kubernetes API (patching
/// `status.conditions`); that client is out of scope here.
#[async_trait::async_trait]
pub trait StatusSink: Send + Sync {
    async fn write_status(
        &self,
        object_ref: ObjectRef,
        status: ObjectStatus,
    ) -> Result<(), StatusWriteError>;
}

/// In-memory [`StatusSink`] that records every write it receives, for tests
/// that want to assert on reconciliation behavior without a real cluster.
#[derive(Debug, Default)]
pub struct RecordingStatusSink {
    written: Mutex<Vec<(ObjectRef, ObjectStatus)>>,
}

impl RecordingStatusSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> Vec<(ObjectRef, ObjectStatus)> {
        self.written.lock().expect("status sink lock poisoned").clone()
    }
}

#[async_trait::async_trait]
impl StatusSink for RecordingStatusSink {
    async fn write_status(&self, object_ref: ObjectRef, status: ObjectStatus) -> Result<(), StatusWriteError> {
        self.written.lock().expect("status sink lock poisoned").push((object_ref, status));
        Ok(())
    }
}

/// Writes every status entry in `dag` through `sink`, logging (not
/// propagating) individual failures so one bad write never blocks the rest
/// of the reconciliation pass.
pub async fn reconcile(dag: &Dag, sink: &dyn StatusSink) {
    for status in &dag.statuses {
        let object_ref = ObjectRef { namespace: status.namespace.clone(), name: status.name.clone() };
        if let Err(error) = sink.write_status(object_ref.clone(), status.clone()).await {
            warn!(
                namespace = %object_ref.namespace,
                name = %object_ref.name,
                error = %error,
                "status write failed, will retry on next rebuild"
            );
        }
    }
}
