//! Shared test doubles for the orchestration traits.
//!
//! Compiled like any other module so the crate's integration tests can use
//! them too; nothing here is wired into production paths.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::channels::{ClientEvent, NotificationChannel};
use crate::engine::JobSubmitter;
use crate::engine::workitem::{JobHandle, WorkItemSpec};
use crate::error::{CallbackError, ChannelError, StorageError, SubmitError, TranslateError};
use crate::orchestrator::ReportFetcher;
use crate::storage::ObjectStore;
use crate::translate::ModelTranslator;

/// Submitter that records every spec and acknowledges with `wi-<n>`.
#[derive(Default)]
pub struct RecordingSubmitter {
    specs: Mutex<Vec<WorkItemSpec>>,
    next: AtomicU32,
}

impl RecordingSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn specs(&self) -> Vec<WorkItemSpec> {
        self.specs.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn submission_count(&self) -> usize {
        self.specs.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl JobSubmitter for RecordingSubmitter {
    async fn submit(&self, spec: WorkItemSpec) -> Result<JobHandle, SubmitError> {
        self.specs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(spec);
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(JobHandle(format!("wi-{n}")))
    }
}

/// In-memory object store with optional lookup failure.
#[derive(Default)]
pub struct FakeStore {
    objects: Mutex<HashSet<String>>,
    puts: Mutex<Vec<(String, Vec<u8>)>>,
    fail_lookups: bool,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, object: &str) -> Self {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(object.to_string());
        self
    }

    /// Every `exists` call reports a store error.
    pub fn failing(mut self) -> Self {
        self.fail_lookups = true;
        self
    }

    pub fn puts(&self) -> Vec<(String, Vec<u8>)> {
        self.puts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn exists(&self, object: &str) -> Result<bool, StorageError> {
        if self.fail_lookups {
            return Err(StorageError::UnexpectedStatus {
                object: object.to_string(),
                status: 500,
            });
        }
        Ok(self
            .objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(object))
    }

    async fn put(&self, object: &str, bytes: Vec<u8>) -> Result<(), StorageError> {
        self.objects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(object.to_string());
        self.puts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((object.to_string(), bytes));
        Ok(())
    }

    async fn signed_read_url(&self, object: &str) -> Result<String, StorageError> {
        Ok(format!("https://signed.example/{object}"))
    }

    fn object_url(&self, object: &str) -> String {
        format!("https://store.example/objects/{object}")
    }

    fn object_id(&self, object: &str) -> String {
        format!("urn:test:{object}")
    }

    fn upload_headers(&self) -> HashMap<String, String> {
        HashMap::from([("Authorization".to_string(), "Bearer test".to_string())])
    }
}

/// Channel that records every pushed event in order.
#[derive(Default)]
pub struct RecordingChannel {
    events: Mutex<Vec<(String, ClientEvent)>>,
}

impl RecordingChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events_for(&self, client_id: &str) -> Vec<ClientEvent> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(id, _)| id == client_id)
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn event_names_for(&self, client_id: &str) -> Vec<&'static str> {
        self.events_for(client_id)
            .iter()
            .map(|e| e.name())
            .collect()
    }
}

#[async_trait]
impl NotificationChannel for RecordingChannel {
    async fn send(&self, client_id: &str, event: ClientEvent) -> Result<(), ChannelError> {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((client_id.to_string(), event));
        Ok(())
    }
}

/// Translator that records calls and signals a notifier, so tests can wait
/// for the detached trigger without sleeping.
#[derive(Default)]
pub struct RecordingTranslator {
    calls: Mutex<Vec<String>>,
    pub notify: Notify,
}

impl RecordingTranslator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ModelTranslator for RecordingTranslator {
    async fn translate(&self, object_id: &str) -> Result<(), TranslateError> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(object_id.to_string());
        self.notify.notify_one();
        Ok(())
    }
}

/// Report fetcher with a canned outcome.
pub struct StubReports {
    outcome: Result<String, String>,
}

impl StubReports {
    pub fn ok(report: &str) -> Self {
        Self {
            outcome: Ok(report.to_string()),
        }
    }

    pub fn failing() -> Self {
        Self {
            outcome: Err("report server unreachable".to_string()),
        }
    }
}

#[async_trait]
impl ReportFetcher for StubReports {
    async fn fetch(&self, _url: &str) -> Result<String, CallbackError> {
        self.outcome
            .clone()
            .map_err(CallbackError::ReportFetch)
    }
}
