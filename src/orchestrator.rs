//! Job orchestration: fingerprinting, cache short-circuit, workitem
//! submission, and callback handling.
//!
//! One request from the client fans out into at most three remote jobs
//! (screenshot, component layout, model archive), or a single keep-alive
//! job in session mode. The engine's callbacks are correlated back to the
//! originating client purely through the `id` query parameter baked into
//! every callback URL — no server-side state is needed outside session mode.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::channels::{ClientEvent, NotificationChannel};
use crate::engine::JobSubmitter;
use crate::engine::workitem::{
    Argument, JobHandle, ParamsDocument, ScreenshotSpec, ShelfParams, WorkItemSpec,
};
use crate::error::{CallbackError, Error, SessionError, SubmitError};
use crate::fingerprint::Fingerprint;
use crate::session::{SessionRegistry, SessionStart};
use crate::storage::{ObjectStore, ResultCache};
use crate::translate::ModelTranslator;

/// Output argument names understood by the engine activity.
const OUTPUT_PNG: &str = "outputPng";
const OUTPUT_JSON: &str = "outputJson";
const OUTPUT_ZIP: &str = "outputZip";

/// `outputFile` marker for session completions; deliberately matches no
/// artifact extension so the completion branch is a no-op.
const SESSION_OUTPUT_FILE: &str = "session";

/// Row-major identity transform, pushed with cached archives so the viewer
/// places the model unrotated at the origin.
const IDENTITY_CELLS: [f64; 16] = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Fetches the engine's human-readable execution report.
#[async_trait]
pub trait ReportFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, CallbackError>;
}

/// Reqwest-backed report fetcher.
pub struct HttpReportFetcher {
    client: reqwest::Client,
}

impl HttpReportFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ReportFetcher for HttpReportFetcher {
    async fn fetch(&self, url: &str) -> Result<String, CallbackError> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| CallbackError::ReportFetch(e.to_string()))?;
        resp.text()
            .await
            .map_err(|e| CallbackError::ReportFetch(e.to_string()))
    }
}

/// Request accepted by `POST /api/jobs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJobsRequest {
    /// Connection id issued by the push hub.
    pub client_id: String,
    pub params: ShelfParams,
    #[serde(default)]
    pub screenshot: Option<ScreenshotSpec>,
    /// Reuse a previously produced archive for identical parameters.
    #[serde(default)]
    pub use_cache: bool,
    /// Keep one remote job alive across parameter revisions.
    #[serde(default)]
    pub keep_running: bool,
}

/// Handles of the submitted jobs, for client-side logging.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJobsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub png_job: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_job: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip_job: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_job: Option<String>,
    /// Whether the archive was served from the cache.
    pub cached: bool,
}

/// Completion callback body. The engine sends more fields than these;
/// unknown ones are ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionPayload {
    /// Workitem id, used to guard session cleanup against stale callbacks.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Where the engine uploaded the human-readable execution report.
    #[serde(default)]
    pub report_url: Option<String>,
}

/// Payload kind of a mid-session data callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    Json,
    Png,
}

impl DataKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "json" => Some(DataKind::Json),
            "png" => Some(DataKind::Png),
            _ => None,
        }
    }
}

/// External collaborators the orchestrator drives.
pub struct OrchestratorDeps {
    pub engine: Arc<dyn JobSubmitter>,
    pub store: Arc<dyn ObjectStore>,
    pub translator: Arc<dyn ModelTranslator>,
    pub channel: Arc<dyn NotificationChannel>,
    pub reports: Arc<dyn ReportFetcher>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Fully qualified activity id the workitems target.
    pub activity_id: String,
    /// Public base URL for callback routes, no trailing slash.
    pub callback_base: String,
    /// Bound on how long a session pull may block.
    pub poll_timeout: Option<Duration>,
}

/// The orchestration service.
pub struct Orchestrator {
    engine: Arc<dyn JobSubmitter>,
    store: Arc<dyn ObjectStore>,
    cache: ResultCache,
    translator: Arc<dyn ModelTranslator>,
    channel: Arc<dyn NotificationChannel>,
    reports: Arc<dyn ReportFetcher>,
    sessions: SessionRegistry,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps, config: OrchestratorConfig) -> Self {
        Self {
            engine: deps.engine,
            cache: ResultCache::new(Arc::clone(&deps.store)),
            store: deps.store,
            translator: deps.translator,
            channel: deps.channel,
            reports: deps.reports,
            sessions: SessionRegistry::new(),
            config,
        }
    }

    /// Start the remote jobs for one client request.
    pub async fn start_jobs(&self, req: StartJobsRequest) -> Result<StartJobsResponse, Error> {
        let fingerprint = Fingerprint::of(&req.params)?;
        let mut resp = StartJobsResponse::default();

        // Session mode is exclusive: the keep-alive job is the one and only
        // submission, producing every output each iteration.
        if req.keep_running {
            let doc = ParamsDocument {
                params: req.params.clone(),
                screenshot: req.screenshot,
                output: None,
            };
            let outcome = self
                .sessions
                .start_or_continue(&req.client_id, doc, |doc| {
                    self.submit_session_job(&req.client_id, doc)
                })
                .await?;
            resp.session_job = match outcome {
                SessionStart::Submitted(handle) => Some(handle.to_string()),
                SessionStart::Continued(handle) => {
                    tracing::info!(client_id = %req.client_id, "Session resumed with new parameters");
                    handle.map(|h| h.to_string())
                }
            };
            return Ok(resp);
        }

        if req.use_cache {
            let zip_name = fingerprint.zip_name();
            if self.cache.exists(&zip_name).await {
                tracing::info!(
                    client_id = %req.client_id,
                    fingerprint = %fingerprint,
                    "Cached archive hit, skipping archive job"
                );
                let payload = cached_components_payload(&zip_name);
                self.push(&req.client_id, ClientEvent::OnComponents(payload))
                    .await;
                resp.cached = true;
            } else {
                let spec = self.archive_spec(&req, &zip_name)?;
                resp.zip_job = Some(self.engine.submit(spec).await?.to_string());
            }
        }

        let png_name = format!("{}.png", req.client_id);
        let png_target = Argument::put(self.store.object_url(&png_name))
            .with_headers(self.store.upload_headers());
        let spec = self.single_output_spec(&req, OUTPUT_PNG, &png_name, png_target)?;
        resp.png_job = Some(self.engine.submit(spec).await?.to_string());

        let json_name = format!("{}.json", req.client_id);
        let json_target = Argument::put(self.ondata_url("json", &req.client_id))
            .with_header("Content-Type", "application/json");
        let spec = self.single_output_spec(&req, OUTPUT_JSON, &json_name, json_target)?;
        resp.json_job = Some(self.engine.submit(spec).await?.to_string());

        Ok(resp)
    }

    /// Handle a mid-session data callback. No state is retained: the payload
    /// is forwarded to the client immediately.
    pub async fn on_data(&self, client_id: &str, kind: DataKind, body: Vec<u8>) {
        match kind {
            DataKind::Json => {
                let value: serde_json::Value = match serde_json::from_slice(&body) {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(client_id, error = %e, "Malformed component data payload");
                        return;
                    }
                };
                self.push(client_id, ClientEvent::OnComponents(value.to_string()))
                    .await;
            }
            DataKind::Png => {
                let object = format!("{client_id}.png");
                if let Err(err) = self.store.put(&object, body).await {
                    tracing::warn!(client_id, error = %err, "Failed to store session screenshot");
                    return;
                }
                match self.store.signed_read_url(&object).await {
                    Ok(url) => self.push(client_id, ClientEvent::OnPicture(url)).await,
                    Err(err) => {
                        tracing::warn!(client_id, error = %err, "Failed to sign session screenshot");
                    }
                }
            }
        }
    }

    /// Handle a job-completion callback.
    ///
    /// Per invocation the client sees, in order: the raw completion body,
    /// the execution report (when the fetch succeeds), then the signed
    /// screenshot URL or a detached translation trigger depending on the
    /// output file's extension. Internal failures are logged, never
    /// escalated — the engine delivers each callback exactly once and must
    /// always receive a success acknowledgment.
    pub async fn on_complete(&self, client_id: &str, output_file: &str, raw_body: &str) {
        self.push(client_id, ClientEvent::OnComplete(raw_body.to_string()))
            .await;

        let payload: CompletionPayload = match serde_json::from_str(raw_body) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(client_id, output_file, error = %e, "Malformed completion payload");
                return;
            }
        };
        tracing::info!(
            client_id,
            output_file,
            job = payload.id.as_deref().unwrap_or(""),
            status = payload.status.as_deref().unwrap_or(""),
            "Workitem completed"
        );

        if let Some(ref url) = payload.report_url {
            match self.reports.fetch(url).await {
                Ok(report) => self.push(client_id, ClientEvent::OnComplete(report)).await,
                Err(err) => {
                    tracing::warn!(client_id, error = %err, "Report fetch failed");
                }
            }
        }

        if output_file.ends_with(".png") {
            match self.store.signed_read_url(output_file).await {
                Ok(url) => self.push(client_id, ClientEvent::OnPicture(url)).await,
                Err(err) => {
                    tracing::warn!(client_id, output_file, error = %err, "Failed to sign screenshot");
                }
            }
        } else if output_file.ends_with(".zip") {
            // The archive is an intermediate artifact; kick off translation
            // as a detached task so the callback acknowledges promptly.
            let translator = Arc::clone(&self.translator);
            let object_id = self.store.object_id(output_file);
            tokio::spawn(async move {
                if let Err(err) = translator.translate(&object_id).await {
                    tracing::warn!(object_id, error = %err, "Translation trigger failed");
                }
            });
        }

        if let Some(id) = payload.id
            && self.sessions.complete(client_id, &JobHandle(id))
        {
            tracing::info!(client_id, "Session ended");
        }
    }

    /// Session pull: block until the client hands off its next parameter
    /// revision, bounded by the configured poll timeout.
    pub async fn next_input(&self, client_id: &str) -> Result<ParamsDocument, SessionError> {
        match self.config.poll_timeout {
            Some(limit) => {
                tokio::time::timeout(limit, self.sessions.await_next_input(client_id))
                    .await
                    .map_err(|_| SessionError::PollTimeout {
                        client_id: client_id.to_string(),
                        waited: limit,
                    })?
            }
            None => self.sessions.await_next_input(client_id).await,
        }
    }

    /// Whether a keep-alive job is registered for `client_id`.
    pub fn session_active(&self, client_id: &str) -> bool {
        self.sessions.contains(client_id)
    }

    async fn submit_session_job(
        &self,
        client_id: &str,
        doc: ParamsDocument,
    ) -> Result<JobHandle, SubmitError> {
        let spec = self.session_spec(client_id, &doc)?;
        self.engine.submit(spec).await
    }

    // -- Spec builders --

    fn base_arguments(
        &self,
        doc: &ParamsDocument,
        client_id: &str,
        output_file: &str,
    ) -> Result<HashMap<String, Argument>, SubmitError> {
        let mut arguments = HashMap::new();
        arguments.insert("inputJson".to_string(), Argument::inline_json(doc)?);
        arguments.insert(
            "onComplete".to_string(),
            Argument::post(self.oncomplete_url(client_id, output_file)),
        );
        Ok(arguments)
    }

    fn single_output_spec(
        &self,
        req: &StartJobsRequest,
        output: &str,
        output_file: &str,
        target: Argument,
    ) -> Result<WorkItemSpec, SubmitError> {
        let doc = ParamsDocument {
            params: req.params.clone(),
            screenshot: req.screenshot,
            output: Some(output.to_string()),
        };
        let mut arguments = self.base_arguments(&doc, &req.client_id, output_file)?;
        arguments.insert(output.to_string(), target);
        Ok(WorkItemSpec {
            activity_id: self.config.activity_id.clone(),
            arguments,
        })
    }

    fn archive_spec(
        &self,
        req: &StartJobsRequest,
        zip_name: &str,
    ) -> Result<WorkItemSpec, SubmitError> {
        let target =
            Argument::put(self.store.object_url(zip_name)).with_headers(self.store.upload_headers());
        self.single_output_spec(req, OUTPUT_ZIP, zip_name, target)
    }

    /// One workitem that produces every output each iteration and pulls its
    /// next parameters from the data endpoint.
    fn session_spec(
        &self,
        client_id: &str,
        doc: &ParamsDocument,
    ) -> Result<WorkItemSpec, SubmitError> {
        let mut arguments = self.base_arguments(doc, client_id, SESSION_OUTPUT_FILE)?;
        arguments.insert(
            "nextParams".to_string(),
            Argument::get(self.data_url(client_id)).on_demand(),
        );
        arguments.insert(
            OUTPUT_PNG.to_string(),
            Argument::put(self.ondata_url("png", client_id)),
        );
        arguments.insert(
            OUTPUT_JSON.to_string(),
            Argument::put(self.ondata_url("json", client_id))
                .with_header("Content-Type", "application/json"),
        );
        Ok(WorkItemSpec {
            activity_id: self.config.activity_id.clone(),
            arguments,
        })
    }

    // -- Callback URL assembly --

    fn callback_url(&self, path: &str, query: &[(&str, &str)]) -> String {
        let mut qs = url::form_urlencoded::Serializer::new(String::new());
        for (k, v) in query {
            qs.append_pair(k, v);
        }
        format!("{}{}?{}", self.config.callback_base, path, qs.finish())
    }

    fn oncomplete_url(&self, client_id: &str, output_file: &str) -> String {
        self.callback_url(
            "/callback/oncomplete",
            &[("id", client_id), ("outputFile", output_file)],
        )
    }

    fn ondata_url(&self, kind: &str, client_id: &str) -> String {
        self.callback_url(&format!("/callback/ondata/{kind}"), &[("id", client_id)])
    }

    fn data_url(&self, client_id: &str) -> String {
        self.callback_url("/data", &[("id", client_id)])
    }

    async fn push(&self, client_id: &str, event: ClientEvent) {
        let name = event.name();
        if let Err(err) = self.channel.send(client_id, event).await {
            tracing::warn!(client_id, event = name, error = %err, "Push notification dropped");
        }
    }
}

/// Components payload for a cache hit: the archive reference plus an
/// identity placement.
fn cached_components_payload(zip_name: &str) -> String {
    serde_json::json!({
        "components": [{ "fileName": zip_name, "cells": IDENTITY_CELLS }]
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::{
        FakeStore, RecordingChannel, RecordingSubmitter, RecordingTranslator, StubReports,
    };

    struct Rig {
        orchestrator: Orchestrator,
        submitter: Arc<RecordingSubmitter>,
        channel: Arc<RecordingChannel>,
        translator: Arc<RecordingTranslator>,
    }

    fn rig_with(store: FakeStore, reports: StubReports) -> Rig {
        let submitter = Arc::new(RecordingSubmitter::new());
        let channel = Arc::new(RecordingChannel::new());
        let translator = Arc::new(RecordingTranslator::new());
        let orchestrator = Orchestrator::new(
            OrchestratorDeps {
                engine: Arc::clone(&submitter) as Arc<dyn JobSubmitter>,
                store: Arc::new(store),
                translator: Arc::clone(&translator) as Arc<dyn ModelTranslator>,
                channel: Arc::clone(&channel) as Arc<dyn NotificationChannel>,
                reports: Arc::new(reports),
            },
            OrchestratorConfig {
                activity_id: "acme.ShelvingUpdate+prod".to_string(),
                callback_base: "https://server.example".to_string(),
                poll_timeout: Some(Duration::from_secs(5)),
            },
        );
        Rig {
            orchestrator,
            submitter,
            channel,
            translator,
        }
    }

    fn rig() -> Rig {
        rig_with(FakeStore::new(), StubReports::ok("report text"))
    }

    fn params() -> ShelfParams {
        ShelfParams {
            height: "750".into(),
            shelf_width: "1000".into(),
            number_of_columns: "5".into(),
        }
    }

    fn request(use_cache: bool, keep_running: bool) -> StartJobsRequest {
        StartJobsRequest {
            client_id: "c1".into(),
            params: params(),
            screenshot: Some(ScreenshotSpec::default()),
            use_cache,
            keep_running,
        }
    }

    fn output_names(spec: &WorkItemSpec) -> Vec<String> {
        let mut names: Vec<String> = spec
            .arguments
            .keys()
            .filter(|k| k.starts_with("output"))
            .cloned()
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn plain_request_submits_png_and_json_jobs() {
        let rig = rig();
        let resp = rig.orchestrator.start_jobs(request(false, false)).await.unwrap();

        assert!(resp.png_job.is_some());
        assert!(resp.json_job.is_some());
        assert!(resp.zip_job.is_none());
        assert!(!resp.cached);

        let specs = rig.submitter.specs();
        assert_eq!(specs.len(), 2);

        let all_outputs: Vec<String> = specs.iter().flat_map(|s| output_names(s)).collect();
        assert_eq!(all_outputs, vec!["outputPng".to_string(), "outputJson".to_string()]);

        for spec in &specs {
            assert_eq!(spec.activity_id, "acme.ShelvingUpdate+prod");
            let complete = &spec.arguments["onComplete"];
            assert!(complete.url.starts_with("https://server.example/callback/oncomplete?"));
            assert!(complete.url.contains("id=c1"));
            assert!(!complete.url.contains(".zip"));
            // Inline input names the requested output.
            let input = &spec.arguments["inputJson"];
            assert!(input.url.starts_with("data:application/json,"));
        }

        let png_spec = specs
            .iter()
            .find(|s| s.arguments.contains_key("outputPng"))
            .unwrap();
        assert_eq!(
            png_spec.arguments["outputPng"].url,
            "https://store.example/objects/c1.png"
        );
        assert!(png_spec.arguments["onComplete"].url.contains("outputFile=c1.png"));
        assert!(
            png_spec.arguments["outputPng"]
                .headers
                .as_ref()
                .unwrap()
                .contains_key("Authorization")
        );

        let json_spec = specs
            .iter()
            .find(|s| s.arguments.contains_key("outputJson"))
            .unwrap();
        assert!(
            json_spec.arguments["outputJson"]
                .url
                .starts_with("https://server.example/callback/ondata/json?id=c1")
        );
        assert!(json_spec.arguments["onComplete"].url.contains("outputFile=c1.json"));
    }

    #[tokio::test]
    async fn cache_hit_skips_archive_job_and_pushes_components() {
        let fingerprint = Fingerprint::of(&params()).unwrap();
        let store = FakeStore::new().with_object(&fingerprint.zip_name());
        let rig = rig_with(store, StubReports::ok("report"));

        let resp = rig.orchestrator.start_jobs(request(true, false)).await.unwrap();
        assert!(resp.cached);
        assert!(resp.zip_job.is_none());

        // No submitted spec produces an archive.
        for spec in rig.submitter.specs() {
            assert!(!spec.arguments.contains_key("outputZip"));
        }

        let events = rig.channel.events_for("c1");
        let ClientEvent::OnComponents(payload) = &events[0] else {
            panic!("expected components event first, got {events:?}");
        };
        let value: serde_json::Value = serde_json::from_str(payload).unwrap();
        assert_eq!(value["components"][0]["fileName"], fingerprint.zip_name());
        let cells = value["components"][0]["cells"].as_array().unwrap();
        assert_eq!(cells.len(), 16);
        assert_eq!(cells[0], 1.0);
        assert_eq!(cells[1], 0.0);
        assert_eq!(cells[5], 1.0);
        assert_eq!(cells[15], 1.0);
    }

    #[tokio::test]
    async fn cache_miss_submits_archive_under_fingerprint_name() {
        let rig = rig_with(FakeStore::new(), StubReports::ok("report"));
        let fingerprint = Fingerprint::of(&params()).unwrap();

        let resp = rig.orchestrator.start_jobs(request(true, false)).await.unwrap();
        assert!(!resp.cached);
        assert!(resp.zip_job.is_some());

        let specs = rig.submitter.specs();
        assert_eq!(specs.len(), 3);

        let zip_spec = specs
            .iter()
            .find(|s| s.arguments.contains_key("outputZip"))
            .unwrap();
        assert_eq!(
            zip_spec.arguments["outputZip"].url,
            format!("https://store.example/objects/{}", fingerprint.zip_name())
        );
        assert!(
            zip_spec.arguments["onComplete"]
                .url
                .contains(&format!("outputFile={}", fingerprint.zip_name()))
        );
    }

    #[tokio::test]
    async fn cache_lookup_failure_degrades_to_miss() {
        let rig = rig_with(FakeStore::new().failing(), StubReports::ok("report"));
        let resp = rig.orchestrator.start_jobs(request(true, false)).await.unwrap();
        assert!(!resp.cached);
        assert!(resp.zip_job.is_some());
    }

    #[tokio::test]
    async fn session_request_submits_one_keepalive_job() {
        let rig = rig();
        let resp = rig.orchestrator.start_jobs(request(false, true)).await.unwrap();
        assert_eq!(resp.session_job.as_deref(), Some("wi-1"));
        assert!(resp.png_job.is_none());
        assert!(resp.json_job.is_none());

        let specs = rig.submitter.specs();
        assert_eq!(specs.len(), 1);
        let spec = &specs[0];

        let next = &spec.arguments["nextParams"];
        assert!(next.url.starts_with("https://server.example/data?id=c1"));
        assert_eq!(next.ondemand, Some(true));

        assert!(
            spec.arguments["outputPng"]
                .url
                .starts_with("https://server.example/callback/ondata/png?id=c1")
        );
        assert!(
            spec.arguments["outputJson"]
                .url
                .starts_with("https://server.example/callback/ondata/json?id=c1")
        );
        assert!(rig.orchestrator.session_active("c1"));
    }

    #[tokio::test]
    async fn second_session_request_feeds_the_running_job() {
        let rig = rig();
        rig.orchestrator.start_jobs(request(false, true)).await.unwrap();

        let mut second = request(false, true);
        second.params.height = "900".into();
        let resp = rig.orchestrator.start_jobs(second).await.unwrap();
        assert_eq!(resp.session_job.as_deref(), Some("wi-1"));
        assert_eq!(rig.submitter.submission_count(), 1);

        let doc = rig.orchestrator.next_input("c1").await.unwrap();
        assert_eq!(doc.params.height, "900");
        assert!(doc.output.is_none());
    }

    #[tokio::test]
    async fn png_completion_pushes_in_order() {
        let rig = rig();
        let body = serde_json::json!({
            "id": "wi-9",
            "status": "success",
            "reportUrl": "https://engine.example/reports/wi-9"
        })
        .to_string();

        rig.orchestrator.on_complete("c1", "c1.png", &body).await;

        let events = rig.channel.events_for("c1");
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], ClientEvent::OnComplete(body));
        assert_eq!(events[1], ClientEvent::OnComplete("report text".into()));
        assert_eq!(
            events[2],
            ClientEvent::OnPicture("https://signed.example/c1.png".into())
        );
    }

    #[tokio::test]
    async fn report_fetch_failure_is_non_fatal() {
        let rig = rig_with(FakeStore::new(), StubReports::failing());
        let body = serde_json::json!({
            "id": "wi-9",
            "reportUrl": "https://engine.example/reports/wi-9"
        })
        .to_string();

        rig.orchestrator.on_complete("c1", "c1.png", &body).await;

        let names = rig.channel.event_names_for("c1");
        assert_eq!(names, vec!["onComplete", "onPicture"]);
    }

    #[tokio::test]
    async fn zip_completion_triggers_translation() {
        let rig = rig();
        let body = serde_json::json!({
            "id": "wi-9",
            "reportUrl": "https://engine.example/reports/wi-9"
        })
        .to_string();

        rig.orchestrator.on_complete("c1", "ab12.zip", &body).await;

        tokio::time::timeout(Duration::from_secs(1), rig.translator.notify.notified())
            .await
            .expect("translation trigger should fire");
        assert_eq!(rig.translator.calls(), vec!["urn:test:ab12.zip"]);

        // No picture for an archive completion.
        let names = rig.channel.event_names_for("c1");
        assert_eq!(names, vec!["onComplete", "onComplete"]);
    }

    #[tokio::test]
    async fn malformed_completion_body_only_pushes_raw() {
        let rig = rig();
        rig.orchestrator.on_complete("c1", "c1.png", "not json").await;

        let events = rig.channel.events_for("c1");
        assert_eq!(events, vec![ClientEvent::OnComplete("not json".into())]);
    }

    #[tokio::test]
    async fn matching_completion_ends_the_session() {
        let rig = rig();
        rig.orchestrator.start_jobs(request(false, true)).await.unwrap();
        assert!(rig.orchestrator.session_active("c1"));

        let body = serde_json::json!({ "id": "wi-1", "status": "success" }).to_string();
        rig.orchestrator.on_complete("c1", "session", &body).await;
        assert!(!rig.orchestrator.session_active("c1"));
    }

    #[tokio::test]
    async fn stale_completion_leaves_the_session() {
        let rig = rig();
        rig.orchestrator.start_jobs(request(false, true)).await.unwrap();

        let body = serde_json::json!({ "id": "wi-superseded" }).to_string();
        rig.orchestrator.on_complete("c1", "session", &body).await;
        assert!(rig.orchestrator.session_active("c1"));
    }

    #[tokio::test]
    async fn session_json_data_is_forwarded_as_components() {
        let rig = rig();
        let body = serde_json::json!({ "components": [{ "fileName": "shelf.ipt" }] });
        rig.orchestrator
            .on_data("c1", DataKind::Json, body.to_string().into_bytes())
            .await;

        let events = rig.channel.events_for("c1");
        assert_eq!(events.len(), 1);
        let ClientEvent::OnComponents(payload) = &events[0] else {
            panic!("expected components event");
        };
        assert!(payload.contains("shelf.ipt"));
    }

    #[tokio::test]
    async fn session_png_data_is_stored_and_signed() {
        let rig = rig();
        rig.orchestrator
            .on_data("c1", DataKind::Png, vec![1, 2, 3])
            .await;

        let events = rig.channel.events_for("c1");
        assert_eq!(
            events,
            vec![ClientEvent::OnPicture("https://signed.example/c1.png".into())]
        );
    }

    #[tokio::test]
    async fn malformed_session_json_is_dropped() {
        let rig = rig();
        rig.orchestrator
            .on_data("c1", DataKind::Json, b"{{{".to_vec())
            .await;
        assert!(rig.channel.events_for("c1").is_empty());
    }

    #[tokio::test]
    async fn next_input_times_out_without_a_session() {
        let submitter = Arc::new(RecordingSubmitter::new());
        let channel = Arc::new(RecordingChannel::new());
        let orchestrator = Orchestrator::new(
            OrchestratorDeps {
                engine: submitter,
                store: Arc::new(FakeStore::new()),
                translator: Arc::new(RecordingTranslator::new()),
                channel,
                reports: Arc::new(StubReports::ok("r")),
            },
            OrchestratorConfig {
                activity_id: "a.B+c".to_string(),
                callback_base: "https://server.example".to_string(),
                poll_timeout: Some(Duration::from_millis(50)),
            },
        );

        let result = orchestrator.next_input("nobody").await;
        assert!(matches!(result, Err(SessionError::PollTimeout { .. })));
    }

    #[test]
    fn data_kind_parses_known_values() {
        assert_eq!(DataKind::parse("json"), Some(DataKind::Json));
        assert_eq!(DataKind::parse("png"), Some(DataKind::Png));
        assert_eq!(DataKind::parse("csv"), None);
    }
}
