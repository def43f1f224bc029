//! Job submission and callback handling.
//!
//! A job is submitted with its input, a pre-allocated output and a callback
//! URL, then forgotten: everything needed to finish it travels in the callback
//! URL. When the automation service calls back, the result is relayed to the
//! browser session and, for document jobs that succeeded, registered as a new
//! version.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Local;
use reqwest::Url;
use serde_json::json;

use crate::config::Settings;
use crate::encoding::encode_segment;
use crate::error::{Result, ServerError};
use crate::forge::data_management::{DocumentRef, StorageRef, StorageSlot};
use crate::forge::design_automation::{Verb, WorkItem, WorkItemArgument, WorkItemCallback, WorkItemStatus};
use crate::forge::{decode, AccessToken, AutomationService, DocumentVersions, ServiceCredentials, UserProfiles};
use crate::relay::{RelayMessage, SessionManager};
use crate::storage::{object_base_name, BlobStore, RetentionPolicy, StorageError};

/// Session id used in callback URLs when no browser is listening
pub const NO_SESSION: &str = "anonymous";

/// Prefix of staged object names (24-hour clock, local time)
const STAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Lifecycle of a job as seen by this server. Nothing is kept between
/// submission and callback; each transition is logged with its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Created,
    Submitted,
    CallbackReceived,
    Relayed,
    Finalized,
}

/// Where the job input comes from
#[derive(Debug, Clone)]
pub enum JobSource {
    /// A browser upload, staged in the transient bucket
    Upload { file_name: String, content: Bytes },
    /// The tip version of a document, given by its href
    Document { href: String },
}

/// Family dimensions handed to the job as `params.json`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JobParameters {
    pub width: f64,
    pub height: f64,
}

impl JobParameters {
    /// Inline `data:` URL the automation service serves as `params.json`
    pub fn data_url(&self) -> String {
        let body = json!({ "Width": self.width, "Height": self.height }).to_string();
        format!("data:application/json, {}", body.replace('"', "'"))
    }
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    /// Fully qualified activity id
    pub activity_id: String,
    pub source: JobSource,
    pub parameters: Option<JobParameters>,
    /// Browser session to relay progress to
    pub session_id: Option<String>,
}

/// Where a finished job's output lives and what to do with it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackTarget {
    /// Output staged in the transient bucket
    Object { bucket_key: String, object_name: String },
    /// Output written to a document storage slot, to be versioned
    Document {
        user_id: String,
        project_id: String,
        slot: StorageSlot,
    },
}

impl CallbackTarget {
    /// Rebuild a document target from the identifiers carried in a callback URL
    pub fn document(
        user_id: String,
        project_id: String,
        item_id: String,
        storage_id: String,
        file_name: String,
    ) -> Result<Self> {
        let storage = StorageRef::parse(&storage_id).map_err(|e| ServerError::InvalidRequest(e.to_string()))?;
        Ok(CallbackTarget::Document {
            user_id,
            project_id,
            slot: StorageSlot {
                storage_id,
                storage,
                item_id,
                file_name,
            },
        })
    }

    fn output(&self) -> (&str, &str) {
        match self {
            CallbackTarget::Object {
                bucket_key,
                object_name,
            } => (bucket_key.as_str(), object_name.as_str()),
            CallbackTarget::Document { slot, .. } => (slot.storage.bucket_key.as_str(), slot.storage.object_name.as_str()),
        }
    }
}

/// A job accepted by the automation service
#[derive(Debug, Clone)]
pub struct SubmittedJob {
    pub work_item_id: String,
}

/// One step of callback handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackStep {
    RelayStatus,
    ParsePayload,
    RelayReport,
    SignOutput,
    RelayResult,
    RelayDownload,
    Finalize,
}

impl fmt::Display for CallbackStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CallbackStep::RelayStatus => "relay status",
            CallbackStep::ParsePayload => "parse payload",
            CallbackStep::RelayReport => "relay report",
            CallbackStep::SignOutput => "sign output",
            CallbackStep::RelayResult => "relay result",
            CallbackStep::RelayDownload => "relay download",
            CallbackStep::Finalize => "finalize",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepStatus {
    Done,
    Skipped(String),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub step: CallbackStep,
    pub status: StepStatus,
}

/// Everything that happened while handling one callback
#[derive(Debug, Clone)]
pub struct CallbackReport {
    pub work_item_id: Option<String>,
    pub status: Option<WorkItemStatus>,
    pub state: JobState,
    pub steps: Vec<StepOutcome>,
    /// Relay messages that reached a live session
    pub delivered: usize,
}

impl CallbackReport {
    fn new() -> Self {
        Self {
            work_item_id: None,
            status: None,
            state: JobState::CallbackReceived,
            steps: Vec::new(),
            delivered: 0,
        }
    }

    #[cfg(test)]
    pub fn outcome(&self, step: CallbackStep) -> Option<&StepStatus> {
        self.steps.iter().find(|s| s.step == step).map(|s| &s.status)
    }

    /// Steps that failed, in the order they ran
    pub fn failed_steps(&self) -> Vec<CallbackStep> {
        self.steps
            .iter()
            .filter(|s| matches!(s.status, StepStatus::Failed(_)))
            .map(|s| s.step)
            .collect()
    }

    #[cfg(test)]
    pub fn failures(&self) -> usize {
        self.failed_steps().len()
    }

    fn record(&mut self, step: CallbackStep, status: StepStatus) {
        match &status {
            StepStatus::Done => tracing::debug!("callback step {} done", step),
            StepStatus::Skipped(why) => tracing::debug!("callback step {} skipped: {}", step, why),
            StepStatus::Failed(err) => tracing::warn!("callback step {} failed: {}", step, err),
        }
        self.steps.push(StepOutcome { step, status });
    }
}

pub struct Orchestrator {
    settings: Arc<Settings>,
    automation: Arc<dyn AutomationService>,
    blobs: Arc<dyn BlobStore>,
    documents: Arc<dyn DocumentVersions>,
    profiles: Arc<dyn UserProfiles>,
    credentials: Arc<dyn ServiceCredentials>,
    relay: SessionManager,
}

impl Orchestrator {
    pub fn new(
        settings: Arc<Settings>,
        automation: Arc<dyn AutomationService>,
        blobs: Arc<dyn BlobStore>,
        documents: Arc<dyn DocumentVersions>,
        profiles: Arc<dyn UserProfiles>,
        credentials: Arc<dyn ServiceCredentials>,
        relay: SessionManager,
    ) -> Self {
        Self {
            settings,
            automation,
            blobs,
            documents,
            profiles,
            credentials,
            relay,
        }
    }

    /// Stage the input, reserve the output and submit the work item.
    ///
    /// Returns as soon as the service accepts the job.
    pub async fn submit(&self, token: &AccessToken, request: SubmitRequest) -> Result<SubmittedJob> {
        let session = request
            .session_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(NO_SESSION);

        let (input, output, target, callback) = match &request.source {
            JobSource::Upload { file_name, content } => {
                self.prepare_upload(token, session, file_name, content.clone()).await?
            }
            JobSource::Document { href } => self.prepare_document(token, session, href).await?,
        };

        let mut arguments = BTreeMap::new();
        arguments.insert("inputFile".to_string(), input);
        if let Some(parameters) = &request.parameters {
            arguments.insert("inputJson".to_string(), WorkItemArgument::inline(parameters.data_url()));
        }
        arguments.insert("outputFile".to_string(), output);
        arguments.insert("onComplete".to_string(), WorkItemArgument::callback(callback));

        let work_item = WorkItem {
            activity_id: request.activity_id.clone(),
            arguments,
        };
        tracing::debug!(state = ?JobState::Created, activity = %request.activity_id, "built work item");
        let submission = self.automation.create_work_item(&work_item).await?;
        if submission.id.is_empty() {
            return Err(ServerError::External(format!(
                "Cannot create work item for {}",
                request.activity_id
            )));
        }

        let (bucket, object) = target.output();
        tracing::info!(
            work_item = %submission.id,
            state = ?JobState::Submitted,
            status = ?submission.status,
            activity = %request.activity_id,
            session = %session,
            bucket = %bucket,
            output = %object,
            "submitted work item"
        );

        Ok(SubmittedJob {
            work_item_id: submission.id,
        })
    }

    async fn prepare_upload(
        &self,
        token: &AccessToken,
        session: &str,
        file_name: &str,
        content: Bytes,
    ) -> Result<(WorkItemArgument, WorkItemArgument, CallbackTarget, String)> {
        let base_name = object_base_name(file_name)
            .ok_or_else(|| ServerError::InvalidRequest(format!("file name '{}'", file_name)))?;

        let bucket = self.settings.staging_bucket();
        match self.blobs.create_bucket(token, &bucket, RetentionPolicy::Transient).await {
            Ok(_) | Err(StorageError::AlreadyExists(_)) => {}
            Err(e) => return Err(e.into()),
        }

        let stamp = Local::now().format(STAMP_FORMAT);
        let input_name = format!("{}_input_{}", stamp, base_name);
        let output_name = format!("{}_output_{}", stamp, base_name);

        self.blobs.put(token, &bucket, &input_name, content).await?;

        let input = WorkItemArgument::with_bearer(self.blobs.object_url(&bucket, &input_name), Verb::Get, token.bearer());
        let output = WorkItemArgument::with_bearer(self.blobs.object_url(&bucket, &output_name), Verb::Put, token.bearer());

        let mut callback = self.callback_base(&[])?;
        callback
            .query_pairs_mut()
            .append_pair("id", session)
            .append_pair("bucketKey", &bucket)
            .append_pair("outputFileName", &output_name);

        let target = CallbackTarget::Object {
            bucket_key: bucket,
            object_name: output_name,
        };
        Ok((input, output, target, callback.to_string()))
    }

    async fn prepare_document(
        &self,
        token: &AccessToken,
        session: &str,
        href: &str,
    ) -> Result<(WorkItemArgument, WorkItemArgument, CallbackTarget, String)> {
        let doc = DocumentRef::parse_href(href).map_err(|e| ServerError::InvalidRequest(e.to_string()))?;

        let item = self.documents.get_item(token, &doc).await?;
        let version = self.documents.current_version(token, &doc).await?;
        let source = version.storage()?;
        tracing::debug!("Using version {} of {}", version.version_id, item.display_name);

        let slot = self.documents.allocate_storage(token, &doc.project_id, &item).await?;
        let user = self.profiles.current_user(token).await?;

        let input = WorkItemArgument::with_bearer(
            self.blobs.object_url(&source.bucket_key, &source.object_name),
            Verb::Get,
            token.bearer(),
        );
        let output = WorkItemArgument::with_bearer(
            self.blobs.object_url(&slot.storage.bucket_key, &slot.storage.object_name),
            Verb::Put,
            token.bearer(),
        );

        let callback = self.callback_base(&[
            "revit",
            session,
            &encode_segment(&user.id),
            &encode_segment(&doc.project_id),
            &encode_segment(&slot.item_id),
            &encode_segment(&slot.storage_id),
            &encode_segment(&slot.file_name),
        ])?;

        let target = CallbackTarget::Document {
            user_id: user.id,
            project_id: doc.project_id,
            slot,
        };
        Ok((input, output, target, callback.to_string()))
    }

    fn callback_base(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}/api/forge/callback/designautomation",
            self.settings.webhook_url
        ))
        .map_err(|e| ServerError::Config(format!("FORGE_WEBHOOK_URL: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ServerError::Config("FORGE_WEBHOOK_URL cannot carry a path".to_string()))?
            .extend(segments);
        Ok(url)
    }

    fn relay(&self, report: &mut CallbackReport, session: &str, message: RelayMessage) {
        if self.relay.push(session, message) {
            report.delivered += 1;
        }
    }

    /// Handle a completion callback. Never fails: every step is attempted
    /// where its inputs are available and its outcome recorded.
    pub async fn on_callback(&self, target: &CallbackTarget, session: &str, payload: &str) -> CallbackReport {
        let mut report = CallbackReport::new();

        self.relay(&mut report, session, RelayMessage::OnComplete(payload.to_string()));
        report.record(CallbackStep::RelayStatus, StepStatus::Done);

        let callback: WorkItemCallback = match decode("work item callback", payload) {
            Ok(callback) => callback,
            Err(e) => {
                let message = e.to_string();
                self.relay(&mut report, session, RelayMessage::OnComplete(format!("Error: {}", message)));
                report.record(CallbackStep::ParsePayload, StepStatus::Failed(message));
                report.state = JobState::Relayed;
                return report;
            }
        };
        report.record(CallbackStep::ParsePayload, StepStatus::Done);
        report.work_item_id = Some(callback.id.clone());
        report.status = Some(callback.status);
        tracing::info!(work_item = %callback.id, status = ?callback.status, "work item callback");

        match &callback.report_url {
            Some(url) => match self.blobs.fetch_url(url).await {
                Ok(body) => {
                    let text = String::from_utf8_lossy(&body).into_owned();
                    self.relay(&mut report, session, RelayMessage::OnComplete(text));
                    report.record(CallbackStep::RelayReport, StepStatus::Done);
                }
                Err(e) => self.fail(&mut report, session, CallbackStep::RelayReport, e.to_string()),
            },
            None => report.record(CallbackStep::RelayReport, StepStatus::Skipped("no report".into())),
        }

        let service = self.credentials.service_token().await.map_err(|e| e.to_string());

        let (bucket, object) = target.output();
        let signed = match &service {
            Ok(token) => self
                .blobs
                .signed_url(token, bucket, object, self.settings.signed_url_minutes)
                .await
                .map_err(|e| e.to_string()),
            Err(e) => Err(e.clone()),
        };

        match signed {
            Ok(url) => {
                report.record(CallbackStep::SignOutput, StepStatus::Done);

                if object.ends_with(".txt") {
                    match self.blobs.fetch_url(&url).await {
                        Ok(body) => {
                            let text = String::from_utf8_lossy(&body).into_owned();
                            self.relay(&mut report, session, RelayMessage::CountItResult(text));
                            report.record(CallbackStep::RelayResult, StepStatus::Done);
                        }
                        Err(e) => self.fail(&mut report, session, CallbackStep::RelayResult, e.to_string()),
                    }
                }

                self.relay(&mut report, session, RelayMessage::DownloadResult(url));
                report.record(CallbackStep::RelayDownload, StepStatus::Done);
            }
            Err(e) => {
                self.fail(&mut report, session, CallbackStep::SignOutput, e);
                report.record(CallbackStep::RelayDownload, StepStatus::Skipped("no signed URL".into()));
            }
        }
        report.state = JobState::Relayed;

        if let CallbackTarget::Document {
            user_id,
            project_id,
            slot,
        } = target
        {
            if !callback.status.is_success() {
                report.record(
                    CallbackStep::Finalize,
                    StepStatus::Skipped(format!("work item ended as {:?}", callback.status)),
                );
                return report;
            }

            let finalized = match &service {
                Ok(token) => self
                    .documents
                    .create_version(token, project_id, slot, Some(user_id.as_str()))
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.clone()),
            };

            match finalized {
                Ok(version) => {
                    tracing::info!("Created version {} of {}", version.version_id, slot.item_id);
                    report.record(CallbackStep::Finalize, StepStatus::Done);
                    report.state = JobState::Finalized;
                }
                Err(e) => self.fail(&mut report, session, CallbackStep::Finalize, e),
            }
        }

        report
    }

    fn fail(&self, report: &mut CallbackReport, session: &str, step: CallbackStep, error: String) {
        self.relay(report, session, RelayMessage::OnComplete(format!("Error ({}): {}", step, error)));
        report.record(step, StepStatus::Failed(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_settings;
    use crate::encoding::decode_segment;
    use crate::testing::{
        FakeAutomation, FakeBlobStore, FakeCredentials, FakeDocuments, FakeProfiles, SLOT_STORAGE_ID,
    };

    struct Harness {
        automation: Arc<FakeAutomation>,
        blobs: Arc<FakeBlobStore>,
        documents: Arc<FakeDocuments>,
        relay: SessionManager,
        orchestrator: Orchestrator,
    }

    fn harness() -> Harness {
        harness_with(Arc::new(FakeBlobStore::new()), Arc::new(FakeDocuments::new()))
    }

    fn harness_with(blobs: Arc<FakeBlobStore>, documents: Arc<FakeDocuments>) -> Harness {
        let automation = Arc::new(FakeAutomation::new("Sample", "dev"));
        let relay = SessionManager::new();
        let orchestrator = Orchestrator::new(
            Arc::new(test_settings()),
            automation.clone(),
            blobs.clone(),
            documents.clone(),
            Arc::new(FakeProfiles::new("U1")),
            Arc::new(FakeCredentials::new()),
            relay.clone(),
        );
        Harness {
            automation,
            blobs,
            documents,
            relay,
            orchestrator,
        }
    }

    fn token() -> AccessToken {
        AccessToken::new("user-token")
    }

    async fn drain(session: &mut crate::relay::RelaySession) -> Vec<RelayMessage> {
        let mut messages = Vec::new();
        while let Ok(Some(m)) =
            tokio::time::timeout(std::time::Duration::from_millis(20), session.recv()).await
        {
            messages.push(m);
        }
        messages
    }

    fn success_payload() -> String {
        r#"{"id":"wi-1","status":"success","reportUrl":"https://report.example/wi-1"}"#.to_string()
    }

    #[tokio::test]
    async fn test_submit_upload_builds_work_item() {
        let h = harness();
        let request = SubmitRequest {
            activity_id: "Sample.X+dev".into(),
            source: JobSource::Upload {
                file_name: "C:\\fakepath\\door.rfa".into(),
                content: Bytes::from_static(b"family"),
            },
            parameters: Some(JobParameters {
                width: 10.0,
                height: 20.0,
            }),
            session_id: Some("session-1".into()),
        };

        let job = h.orchestrator.submit(&token(), request).await.unwrap();
        assert_eq!(job.work_item_id, "wi-1");

        let items = h.automation.work_items();
        assert_eq!(items.len(), 1);
        let args = &items[0].arguments;
        assert_eq!(args["inputFile"].verb, Some(Verb::Get));
        assert_eq!(args["outputFile"].verb, Some(Verb::Put));
        assert_eq!(
            args["inputFile"].headers.as_ref().unwrap()["Authorization"],
            "Bearer user-token"
        );
        assert_eq!(args["onComplete"].verb, Some(Verb::Post));
        assert!(args["onComplete"].url.starts_with("https://hooks.example.com/api/forge/callback/designautomation?"));
        assert!(args["onComplete"].url.contains("id=session-1"));
        assert!(args["onComplete"].url.contains("bucketKey=sample_designautomation"));
        assert!(args["inputJson"].url.starts_with("data:application/json, {"));
        assert!(args["inputJson"].url.contains("'Width':10.0"));
        assert!(!args["inputJson"].url.contains('"'));

        let callback = Url::parse(&args["onComplete"].url).unwrap();
        let output_name = callback
            .query_pairs()
            .find(|(k, _)| k == "outputFileName")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        assert!(output_name.ends_with("_output_door.rfa"));
        assert!(args["outputFile"].url.ends_with(&format!("/sample_designautomation/{}", output_name)));

        let stored = h.blobs.object_names("sample_designautomation");
        assert_eq!(stored.len(), 1);
        assert!(stored[0].ends_with("_input_door.rfa"));
        let (stamp, _) = stored[0].split_once('_').unwrap();
        assert_eq!(stamp.len(), 14);
        assert!(stamp.bytes().all(|b| b.is_ascii_digit()));
        assert!(chrono::NaiveDateTime::parse_from_str(stamp, STAMP_FORMAT).is_ok());
        assert!(output_name.starts_with(stamp));
    }

    #[tokio::test]
    async fn test_submit_rejects_directory_upload() {
        let h = harness();
        let request = SubmitRequest {
            activity_id: "Sample.X+dev".into(),
            source: JobSource::Upload {
                file_name: "C:\\fakepath\\".into(),
                content: Bytes::from_static(b"x"),
            },
            parameters: None,
            session_id: None,
        };
        let err = h.orchestrator.submit(&token(), request).await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
        assert!(h.automation.work_items().is_empty());
    }

    #[tokio::test]
    async fn test_submit_tolerates_existing_bucket() {
        let blobs = Arc::new(FakeBlobStore::new());
        blobs.seed_bucket("sample_designautomation");
        let h = harness_with(blobs, Arc::new(FakeDocuments::new()));

        let request = SubmitRequest {
            activity_id: "Sample.X+dev".into(),
            source: JobSource::Upload {
                file_name: "model.rvt".into(),
                content: Bytes::from_static(b"m"),
            },
            parameters: None,
            session_id: None,
        };
        h.orchestrator.submit(&token(), request).await.unwrap();
        let args = &h.automation.work_items()[0].arguments;
        assert!(!args.contains_key("inputJson"));
        assert!(args["onComplete"].url.contains(&format!("id={}", NO_SESSION)));
    }

    #[tokio::test]
    async fn test_submit_document_reserves_slot() {
        let h = harness();
        let request = SubmitRequest {
            activity_id: test_settings().update_family_activity(),
            source: JobSource::Document {
                href: "https://developer.api.autodesk.com/data/v1/projects/b.proj/items/urn:item".into(),
            },
            parameters: None,
            session_id: Some("s-9".into()),
        };

        let job = h.orchestrator.submit(&token(), request).await.unwrap();
        assert_eq!(job.work_item_id, "wi-1");
        assert_eq!(h.documents.calls(), vec!["get_item urn:item", "list_versions urn:item", "allocate_storage b.proj"]);

        let items = h.automation.work_items();
        let args = &items[0].arguments;
        assert!(args["inputFile"].url.ends_with("/wip.dm.prod/tip.rvt"));
        assert!(args["outputFile"].url.ends_with("/wip.dm.prod/slot.rvt"));

        let callback = Url::parse(&args["onComplete"].url).unwrap();
        let segments: Vec<&str> = callback.path_segments().unwrap().collect();
        assert_eq!(&segments[..5], &["api", "forge", "callback", "designautomation", "revit"]);
        assert_eq!(segments[5], "s-9");
        assert_eq!(decode_segment(segments[6]).unwrap(), "U1");
        assert_eq!(decode_segment(segments[7]).unwrap(), "b.proj");
        assert_eq!(decode_segment(segments[9]).unwrap(), SLOT_STORAGE_ID);
        assert_eq!(decode_segment(segments[10]).unwrap(), "Family.rvt");
    }

    #[tokio::test]
    async fn test_submit_without_work_item_id() {
        let h = harness();
        h.automation.return_blank_work_item_ids();
        let request = SubmitRequest {
            activity_id: "Sample.X+dev".into(),
            source: JobSource::Upload {
                file_name: "model.rvt".into(),
                content: Bytes::from_static(b"m"),
            },
            parameters: None,
            session_id: None,
        };
        let err = h.orchestrator.submit(&token(), request).await.unwrap_err();
        assert!(matches!(err, ServerError::External(_)));
    }

    #[tokio::test]
    async fn test_bad_document_href() {
        let h = harness();
        let request = SubmitRequest {
            activity_id: "a".into(),
            source: JobSource::Document { href: "nope".into() },
            parameters: None,
            session_id: None,
        };
        let err = h.orchestrator.submit(&token(), request).await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidRequest(_)));
        assert!(h.automation.work_items().is_empty());
    }

    #[tokio::test]
    async fn test_text_output_relays_count_result() {
        let blobs = Arc::new(FakeBlobStore::new());
        blobs.seed_url("https://report.example/wi-1", "report log");
        blobs.seed_object("sample_designautomation", "20200101000000_output_count.txt", "{\"walls\":3}");
        let h = harness_with(blobs, Arc::new(FakeDocuments::new()));
        let mut session = h.relay.connect();
        let id = session.id().to_string();

        let target = CallbackTarget::Object {
            bucket_key: "sample_designautomation".into(),
            object_name: "20200101000000_output_count.txt".into(),
        };
        let report = h.orchestrator.on_callback(&target, &id, &success_payload()).await;
        assert_eq!(report.failures(), 0);
        assert_eq!(report.state, JobState::Relayed);

        let messages = drain(&mut session).await;
        let names: Vec<&str> = messages.iter().map(|m| m.event_name()).collect();
        assert_eq!(
            names,
            vec!["connected", "onComplete", "onComplete", "countItResult", "downloadResult"]
        );
        assert_eq!(messages[3].payload(), "{\"walls\":3}");
    }

    #[tokio::test]
    async fn test_model_output_relays_download_only() {
        let blobs = Arc::new(FakeBlobStore::new());
        blobs.seed_url("https://report.example/wi-1", "report log");
        let h = harness_with(blobs, Arc::new(FakeDocuments::new()));
        let mut session = h.relay.connect();
        let id = session.id().to_string();

        let target = CallbackTarget::Object {
            bucket_key: "sample_designautomation".into(),
            object_name: "out.rvt".into(),
        };
        h.orchestrator.on_callback(&target, &id, &success_payload()).await;

        let messages = drain(&mut session).await;
        let names: Vec<&str> = messages.iter().map(|m| m.event_name()).collect();
        assert_eq!(names, vec!["connected", "onComplete", "onComplete", "downloadResult"]);
        assert_eq!(messages[2].payload(), "report log");
        assert!(messages[3].payload().contains("out.rvt"));
    }

    #[tokio::test]
    async fn test_callback_without_session() {
        let blobs = Arc::new(FakeBlobStore::new());
        blobs.seed_url("https://report.example/wi-1", "report");
        let h = harness_with(blobs, Arc::new(FakeDocuments::new()));

        let target = CallbackTarget::Object {
            bucket_key: "b".into(),
            object_name: "o.rvt".into(),
        };
        let report = h.orchestrator.on_callback(&target, NO_SESSION, &success_payload()).await;
        assert_eq!(report.delivered, 0);
        assert_eq!(report.failures(), 0);
        assert_eq!(report.outcome(CallbackStep::RelayDownload), Some(&StepStatus::Done));
    }

    #[tokio::test]
    async fn test_malformed_payload_stops_early() {
        let h = harness();
        let target = CallbackTarget::Object {
            bucket_key: "b".into(),
            object_name: "o.rvt".into(),
        };
        let report = h.orchestrator.on_callback(&target, NO_SESSION, "not json").await;
        assert!(matches!(report.outcome(CallbackStep::ParsePayload), Some(StepStatus::Failed(_))));
        assert!(report.outcome(CallbackStep::SignOutput).is_none());
    }

    #[tokio::test]
    async fn test_failing_collaborators_never_raise() {
        let h = harness_with(Arc::new(FakeBlobStore::failing()), Arc::new(FakeDocuments::failing()));
        let target = CallbackTarget::document(
            "U1".into(),
            "b.proj".into(),
            "urn:item".into(),
            SLOT_STORAGE_ID.into(),
            "Family.rvt".into(),
        )
        .unwrap();

        let report = h.orchestrator.on_callback(&target, NO_SESSION, &success_payload()).await;
        assert!(matches!(report.outcome(CallbackStep::RelayReport), Some(StepStatus::Failed(_))));
        assert!(matches!(report.outcome(CallbackStep::SignOutput), Some(StepStatus::Failed(_))));
        assert!(matches!(report.outcome(CallbackStep::Finalize), Some(StepStatus::Failed(_))));
        assert_eq!(report.state, JobState::Relayed);
    }

    #[tokio::test]
    async fn test_finalize_only_on_success() {
        let h = harness();
        let target = CallbackTarget::document(
            "U1".into(),
            "b.proj".into(),
            "urn:item".into(),
            SLOT_STORAGE_ID.into(),
            "Family.rvt".into(),
        )
        .unwrap();

        let failed = r#"{"id":"wi-2","status":"failedInstructions","reportUrl":null}"#;
        let report = h.orchestrator.on_callback(&target, NO_SESSION, failed).await;
        assert!(matches!(report.outcome(CallbackStep::Finalize), Some(StepStatus::Skipped(_))));
        assert_eq!(report.state, JobState::Relayed);
        assert!(h.documents.calls().is_empty());

        let report = h
            .orchestrator
            .on_callback(&target, NO_SESSION, r#"{"id":"wi-3","status":"success"}"#)
            .await;
        assert_eq!(report.outcome(CallbackStep::Finalize), Some(&StepStatus::Done));
        assert_eq!(report.state, JobState::Finalized);
        assert_eq!(h.documents.calls(), vec!["create_version b.proj urn:item as U1"]);
    }

    #[tokio::test]
    async fn test_unrecognized_status_still_relays() {
        let blobs = Arc::new(FakeBlobStore::new());
        blobs.seed_url("https://report.example/wi-4", "report log");
        let h = harness_with(blobs, Arc::new(FakeDocuments::new()));
        let mut session = h.relay.connect();
        let id = session.id().to_string();

        let target = CallbackTarget::document(
            "U1".into(),
            "b.proj".into(),
            "urn:item".into(),
            SLOT_STORAGE_ID.into(),
            "Family.rvt".into(),
        )
        .unwrap();
        let payload = r#"{"id":"wi-4","status":"failedMissingOutput","reportUrl":"https://report.example/wi-4"}"#;
        let report = h.orchestrator.on_callback(&target, &id, payload).await;

        assert_eq!(report.status, Some(WorkItemStatus::Unknown));
        assert_eq!(report.outcome(CallbackStep::ParsePayload), Some(&StepStatus::Done));
        assert_eq!(report.outcome(CallbackStep::RelayReport), Some(&StepStatus::Done));
        assert_eq!(report.outcome(CallbackStep::RelayDownload), Some(&StepStatus::Done));
        assert!(matches!(report.outcome(CallbackStep::Finalize), Some(StepStatus::Skipped(_))));
        assert_eq!(report.state, JobState::Relayed);
        assert!(h.documents.calls().is_empty());

        let messages = drain(&mut session).await;
        let names: Vec<&str> = messages.iter().map(|m| m.event_name()).collect();
        assert_eq!(names, vec!["connected", "onComplete", "onComplete", "downloadResult"]);
        assert_eq!(messages[2].payload(), "report log");
    }
}
