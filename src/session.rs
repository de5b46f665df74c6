//! Per-client registry for keep-alive jobs.
//!
//! Session mode keeps one remote job running across many parameter
//! revisions: after each iteration the job polls the server for its next
//! input. The registry correlates those polls with client submissions
//! through a single-use rendezvous cell per client.
//!
//! State machine per client id:
//!
//! ```text
//! (none) ── start_or_continue ──► submitted (cell idle)
//!   cell: idle ── poll ──► waiting ── start_or_continue ──► handed off
//!   cell: idle ── start_or_continue ──► ready ── poll ──► handed off
//! (entry) ── matching completion ──► removed
//! ```
//!
//! At most one remote job runs per client: a `start_or_continue` against a
//! live entry resolves the rendezvous instead of submitting a second job.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::engine::workitem::{JobHandle, ParamsDocument};
use crate::error::{SessionError, SubmitError};

/// Single-use hand-off cell between a client submission and the remote
/// job's pull callback.
enum Rendezvous {
    /// No input pending, no poller waiting.
    Idle,
    /// Input arrived before the job polled; consumed by the next poll.
    Ready(ParamsDocument),
    /// The job polled first and is suspended on the receiver half.
    Waiting(oneshot::Sender<ParamsDocument>),
}

struct SessionEntry {
    /// Set once the submission acknowledgment arrives; `None` while the
    /// first submission is in flight (or when a poll raced ahead of it).
    handle: Option<JobHandle>,
    cell: Rendezvous,
}

impl SessionEntry {
    fn detached() -> Self {
        Self {
            handle: None,
            cell: Rendezvous::Idle,
        }
    }
}

/// Outcome of [`SessionRegistry::start_or_continue`].
#[derive(Debug)]
pub enum SessionStart {
    /// A new remote job was submitted for this client.
    Submitted(JobHandle),
    /// An existing job was resumed; no new submission happened. The handle
    /// is `None` when the original submission is still in flight.
    Continued(Option<JobHandle>),
}

/// Tracks in-flight keep-alive jobs, one entry per client id.
///
/// The map is guarded by a std mutex: every critical section is a plain
/// map or cell mutation, never held across an await.
pub struct SessionRegistry {
    entries: Mutex<HashMap<String, SessionEntry>>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Resume the client's session with `input`, submitting a new remote job
    /// via `submit` only when no session exists yet.
    ///
    /// The first call for a client reserves the entry, then runs `submit`
    /// outside the lock; concurrent calls for the same client observe the
    /// reservation and resolve the rendezvous instead of submitting again.
    pub async fn start_or_continue<F, Fut>(
        &self,
        client_id: &str,
        input: ParamsDocument,
        submit: F,
    ) -> Result<SessionStart, SubmitError>
    where
        F: FnOnce(ParamsDocument) -> Fut,
        Fut: Future<Output = Result<JobHandle, SubmitError>>,
    {
        {
            let mut entries = self.lock();
            if let Some(entry) = entries.get_mut(client_id) {
                let handle = entry.handle.clone();
                Self::resolve_cell(client_id, entry, input);
                return Ok(SessionStart::Continued(handle));
            }
            // Reserve before submitting so a racing call sees the entry.
            entries.insert(client_id.to_string(), SessionEntry::detached());
        }

        match submit(input).await {
            Ok(handle) => {
                let mut entries = self.lock();
                // The entry survives unless a completion raced the ack.
                if let Some(entry) = entries.get_mut(client_id) {
                    entry.handle = Some(handle.clone());
                }
                tracing::info!(client_id, job = %handle, "Session job submitted");
                Ok(SessionStart::Submitted(handle))
            }
            Err(err) => {
                // Drop the reservation; a waiting poller (if any) is woken
                // with a closed-session error by the sender going away.
                self.lock().remove(client_id);
                Err(err)
            }
        }
    }

    /// Hand `input` to the entry's rendezvous cell.
    ///
    /// An unconsumed pending input is kept — the cell is single-use and a
    /// fresh one is only created after the previous hand-off completed.
    fn resolve_cell(client_id: &str, entry: &mut SessionEntry, input: ParamsDocument) {
        match std::mem::replace(&mut entry.cell, Rendezvous::Idle) {
            Rendezvous::Waiting(tx) => {
                if let Err(input) = tx.send(input) {
                    // Poller gave up (timeout/disconnect); keep the input
                    // for the next poll cycle.
                    tracing::debug!(client_id, "Poller gone, parking input for next poll");
                    entry.cell = Rendezvous::Ready(input);
                }
            }
            Rendezvous::Idle => entry.cell = Rendezvous::Ready(input),
            Rendezvous::Ready(pending) => {
                tracing::warn!(client_id, "Unconsumed session input pending, dropping new input");
                entry.cell = Rendezvous::Ready(pending);
            }
        }
    }

    /// Block until the next input for `client_id` is handed off, then return
    /// it. Each hand-off is consumed exactly once; calling again suspends
    /// until the following `start_or_continue`.
    ///
    /// A poll that arrives before any session exists registers a detached
    /// entry and suspends — intentional backpressure on the remote job.
    pub async fn await_next_input(&self, client_id: &str) -> Result<ParamsDocument, SessionError> {
        let rx = {
            let mut entries = self.lock();
            let entry = entries
                .entry(client_id.to_string())
                .or_insert_with(SessionEntry::detached);

            match std::mem::replace(&mut entry.cell, Rendezvous::Idle) {
                Rendezvous::Ready(input) => return Ok(input),
                Rendezvous::Idle => {
                    let (tx, rx) = oneshot::channel();
                    entry.cell = Rendezvous::Waiting(tx);
                    rx
                }
                Rendezvous::Waiting(stale) => {
                    // A duplicate poll supersedes the previous waiter, which
                    // wakes with a closed-session error.
                    tracing::warn!(client_id, "Concurrent poll superseded an earlier waiter");
                    drop(stale);
                    let (tx, rx) = oneshot::channel();
                    entry.cell = Rendezvous::Waiting(tx);
                    rx
                }
            }
        };

        rx.await.map_err(|_| SessionError::Closed {
            client_id: client_id.to_string(),
        })
    }

    /// Remove the entry for `client_id` if `handle` matches the stored one.
    ///
    /// Returns whether the entry was removed. A mismatch (stale or duplicate
    /// completion from a superseded job) leaves the entry untouched.
    pub fn complete(&self, client_id: &str, handle: &JobHandle) -> bool {
        let mut entries = self.lock();
        match entries
            .get(client_id)
            .map(|entry| entry.handle.as_ref() == Some(handle))
        {
            Some(true) => {
                entries.remove(client_id);
                true
            }
            Some(false) => {
                tracing::debug!(client_id, job = %handle, "Ignoring completion for non-current job");
                false
            }
            None => false,
        }
    }

    /// Whether a session entry exists for `client_id`.
    pub fn contains(&self, client_id: &str) -> bool {
        self.lock().contains_key(client_id)
    }

    /// Stored job handle for `client_id`, if any.
    pub fn handle_of(&self, client_id: &str) -> Option<JobHandle> {
        self.lock().get(client_id).and_then(|e| e.handle.clone())
    }

    /// Whether a poller is currently suspended on the client's cell.
    #[cfg(test)]
    fn poller_waiting(&self, client_id: &str) -> bool {
        matches!(
            self.lock().get(client_id).map(|e| &e.cell),
            Some(Rendezvous::Waiting(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::engine::workitem::ShelfParams;

    fn doc(height: &str) -> ParamsDocument {
        ParamsDocument {
            params: ShelfParams {
                height: height.into(),
                shelf_width: "1000".into(),
                number_of_columns: "5".into(),
            },
            screenshot: None,
            output: None,
        }
    }

    fn submit_ok(
        counter: &Arc<AtomicU32>,
    ) -> impl FnOnce(ParamsDocument) -> std::future::Ready<Result<JobHandle, SubmitError>> {
        let counter = Arc::clone(counter);
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(JobHandle("wi-1".into())))
        }
    }

    #[tokio::test]
    async fn second_call_resolves_instead_of_submitting() {
        let registry = SessionRegistry::new();
        let submissions = Arc::new(AtomicU32::new(0));

        let first = registry
            .start_or_continue("c1", doc("750"), submit_ok(&submissions))
            .await
            .unwrap();
        assert!(matches!(first, SessionStart::Submitted(JobHandle(ref id)) if id.as_str() == "wi-1"));

        let second = registry
            .start_or_continue("c1", doc("800"), submit_ok(&submissions))
            .await
            .unwrap();
        assert!(matches!(
            second,
            SessionStart::Continued(Some(JobHandle(ref id))) if id.as_str() == "wi-1"
        ));

        assert_eq!(submissions.load(Ordering::SeqCst), 1);

        // The second call's input is waiting for the job's next poll.
        let input = registry.await_next_input("c1").await.unwrap();
        assert_eq!(input.params.height, "800");
    }

    #[tokio::test]
    async fn rendezvous_is_single_use() {
        let registry = Arc::new(SessionRegistry::new());
        let submissions = Arc::new(AtomicU32::new(0));

        registry
            .start_or_continue("c1", doc("750"), submit_ok(&submissions))
            .await
            .unwrap();
        registry
            .start_or_continue("c1", doc("800"), submit_ok(&submissions))
            .await
            .unwrap();

        let first = registry.await_next_input("c1").await.unwrap();
        assert_eq!(first.params.height, "800");

        // No new input yet: the next poll must suspend, not replay.
        let mut pending = tokio_test::task::spawn(registry.await_next_input("c1"));
        assert!(
            pending.poll().is_pending(),
            "poll must suspend until the next hand-off"
        );
        drop(pending);

        // Resolve from another task while a poll is suspended.
        let poller = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.await_next_input("c1").await })
        };
        tokio::task::yield_now().await;
        registry
            .start_or_continue("c1", doc("900"), submit_ok(&submissions))
            .await
            .unwrap();

        let second = poller.await.unwrap().unwrap();
        assert_eq!(second.params.height, "900");
        assert_eq!(submissions.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn poll_before_start_blocks_until_input() {
        let registry = Arc::new(SessionRegistry::new());
        let submissions = Arc::new(AtomicU32::new(0));

        let poller = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.await_next_input("c1").await })
        };
        while !registry.poller_waiting("c1") {
            tokio::task::yield_now().await;
        }

        // Entry now exists (detached), so this resolves rather than submits.
        let outcome = registry
            .start_or_continue("c1", doc("750"), submit_ok(&submissions))
            .await
            .unwrap();
        assert!(matches!(outcome, SessionStart::Continued(None)));
        assert_eq!(submissions.load(Ordering::SeqCst), 0);

        let input = poller.await.unwrap().unwrap();
        assert_eq!(input.params.height, "750");
    }

    #[tokio::test]
    async fn unconsumed_input_is_not_overwritten() {
        let registry = SessionRegistry::new();
        let submissions = Arc::new(AtomicU32::new(0));

        registry
            .start_or_continue("c1", doc("750"), submit_ok(&submissions))
            .await
            .unwrap();
        registry
            .start_or_continue("c1", doc("800"), submit_ok(&submissions))
            .await
            .unwrap();
        registry
            .start_or_continue("c1", doc("850"), submit_ok(&submissions))
            .await
            .unwrap();

        // The pending "800" hand-off was never consumed; "850" was dropped.
        let input = registry.await_next_input("c1").await.unwrap();
        assert_eq!(input.params.height, "800");
    }

    #[tokio::test]
    async fn completion_with_matching_handle_removes_entry() {
        let registry = SessionRegistry::new();
        let submissions = Arc::new(AtomicU32::new(0));

        registry
            .start_or_continue("c1", doc("750"), submit_ok(&submissions))
            .await
            .unwrap();
        assert!(registry.contains("c1"));

        assert!(registry.complete("c1", &JobHandle("wi-1".into())));
        assert!(!registry.contains("c1"));
    }

    #[tokio::test]
    async fn stale_completion_leaves_entry_untouched() {
        let registry = SessionRegistry::new();
        let submissions = Arc::new(AtomicU32::new(0));

        registry
            .start_or_continue("c1", doc("750"), submit_ok(&submissions))
            .await
            .unwrap();
        registry
            .start_or_continue("c1", doc("800"), submit_ok(&submissions))
            .await
            .unwrap();

        assert!(!registry.complete("c1", &JobHandle("wi-stale".into())));
        assert!(registry.contains("c1"));
        assert_eq!(registry.handle_of("c1"), Some(JobHandle("wi-1".into())));

        // The pending rendezvous survived the stale completion.
        let input = registry.await_next_input("c1").await.unwrap();
        assert_eq!(input.params.height, "800");
    }

    #[tokio::test]
    async fn completion_wakes_suspended_poller_with_closed() {
        let registry = Arc::new(SessionRegistry::new());
        let submissions = Arc::new(AtomicU32::new(0));

        registry
            .start_or_continue("c1", doc("750"), submit_ok(&submissions))
            .await
            .unwrap();

        let poller = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.await_next_input("c1").await })
        };
        while !registry.poller_waiting("c1") {
            tokio::task::yield_now().await;
        }

        assert!(registry.complete("c1", &JobHandle("wi-1".into())));
        let result = poller.await.unwrap();
        assert!(matches!(result, Err(SessionError::Closed { .. })));
    }

    #[tokio::test]
    async fn failed_submission_releases_the_entry() {
        let registry = SessionRegistry::new();

        let result = registry
            .start_or_continue("c1", doc("750"), |_| {
                std::future::ready(Err(SubmitError::Rejected {
                    status: 400,
                    body: "bad".into(),
                }))
            })
            .await;
        assert!(result.is_err());
        assert!(!registry.contains("c1"));

        // A later call submits fresh.
        let submissions = Arc::new(AtomicU32::new(0));
        let outcome = registry
            .start_or_continue("c1", doc("750"), submit_ok(&submissions))
            .await
            .unwrap();
        assert!(matches!(outcome, SessionStart::Submitted(_)));
        assert_eq!(submissions.load(Ordering::SeqCst), 1);
    }
}
