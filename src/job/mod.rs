//! Job orchestration -- submitting, tracking, and cancelling translation
//! jobs for the three document kinds this crate supports.
//!
//! `JobConfig` is the caller's immutable request; `JobRecord` is the
//! orchestrator's mutable view of a job in flight, guarded by a per-job
//! `tokio::sync::Mutex` inside a shared table, the same shape as the
//! teacher's `Arc<RwLock<SessionStore>>` state store in
//! `kernel/pipeline.rs`/`kernel/session.rs`. Each submitted job runs on its
//! own `tokio::spawn`ed task; the orchestrator never blocks a caller on a
//! job's translation work, only on the short-lived lock over its record.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::cancel::CancellationToken;
use crate::config::DoctranConfig;
use crate::engine::{self, ChunkOutcome, TranslationOptions};
use crate::epub::{self, EpubStats};
use crate::error::DoctranError;
use crate::postprocess::PostProcessor;
use crate::provider::{self, LlmProvider};
use crate::srt::{self, SrtStats};

/// Opaque identifier for a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which document format a job translates (`spec.md` §3 "Translation Job").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    /// Plain text, chunked and translated via [`crate::engine`].
    PlainText,
    /// EPUB container, translated via [`crate::epub`].
    Epub,
    /// SubRip subtitles, translated via [`crate::srt`].
    Srt,
}

/// Immutable request a caller submits to the orchestrator.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Which document format `source` holds.
    pub kind: DocumentKind,
    /// Raw input bytes (UTF-8 text for `PlainText`/`Srt`, a zip archive for `Epub`).
    pub source: Vec<u8>,
    /// Absolute path the translated output is written to.
    pub output_path: std::path::PathBuf,
    /// Source language name.
    pub source_language: String,
    /// Target language name.
    pub target_language: String,
    /// Free-form instructions appended to every translation prompt.
    pub custom_instructions: String,
    /// Whether a second LLM pass improves each unit after translation.
    pub enable_post_processing: bool,
    /// Free-form instructions appended to every post-processing prompt.
    pub post_processing_instructions: String,
}

/// Lifecycle state of a job (`spec.md` §3 invariants: terminal once reached
/// except `Running -> Interrupted`; `Interrupted` is itself terminal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Submitted, worker task not yet started.
    Queued,
    /// Worker task is actively translating.
    Running,
    /// Finished translating every unit (some may have individually failed).
    Completed,
    /// Cancelled via [`Orchestrator::interrupt`] before completion.
    Interrupted,
    /// Stopped by an unrecoverable error (bad input, I/O failure).
    Error,
}

/// Progress/outcome counters for a job, shape shared across all three
/// document kinds.
#[derive(Debug, Clone, Copy, Default)]
pub struct JobStats {
    /// Units translated (successfully or with a recorded per-unit failure).
    pub completed: usize,
    /// Units that individually failed and fell back to source text.
    pub failed: usize,
    /// Total units known once the document has been parsed/chunked.
    pub total: usize,
}

struct JobRecordInner {
    status: JobStatus,
    progress: f64,
    stats: JobStats,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
    cancel: CancellationToken,
}

/// A point-in-time, deep-copied view of a job's state, safe to hand back
/// to a caller without holding any lock.
#[derive(Debug, Clone)]
pub struct JobSnapshot {
    /// The job's id.
    pub id: JobId,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Percent complete, `0.0..=100.0`, monotonically non-decreasing while running.
    pub progress: f64,
    /// Current progress/outcome counters.
    pub stats: JobStats,
    /// When the job was submitted.
    pub started_at: DateTime<Utc>,
    /// When the job reached a terminal state, if it has.
    pub finished_at: Option<DateTime<Utc>>,
    /// Error message, set only when `status == Error`.
    pub error: Option<String>,
}

/// One-line summary of a job, as returned by [`Orchestrator::list`].
#[derive(Debug, Clone)]
pub struct JobSummary {
    /// The job's id.
    pub id: JobId,
    /// Current lifecycle state.
    pub status: JobStatus,
    /// Percent complete.
    pub progress: f64,
    /// When the job was submitted.
    pub started_at: DateTime<Utc>,
}

/// A sink for structured job lifecycle events. Implementations are called
/// best-effort: a failing sink never aborts the job it's reporting on
/// (`spec.md` §5, resolved Open Question -- typed events only, no
/// legacy string-keyed callback form).
pub trait JobEventSink: Send + Sync {
    /// Called whenever a job's progress or stats change.
    fn on_progress(&self, id: JobId, snapshot: &JobSnapshot) {
        let _ = (id, snapshot);
    }

    /// Called once when a job reaches any terminal state.
    fn on_terminal(&self, id: JobId, snapshot: &JobSnapshot) {
        let _ = (id, snapshot);
    }
}

/// A [`JobEventSink`] that discards every event, the orchestrator's default.
pub struct NullEventSink;

impl JobEventSink for NullEventSink {}

fn provider_key(config: &crate::config::ProviderConfig) -> String {
    format!("{:?}|{}|{}", config.kind, config.base_url, config.model)
}

/// Owns every submitted job's state and dispatches its translation work.
///
/// Workers that share an identical provider configuration share one
/// `LlmProvider` instance and its connection pool (`spec.md` §5), tracked
/// in `providers` keyed by a normalised view of the provider config.
pub struct Orchestrator {
    jobs: Mutex<HashMap<JobId, Arc<Mutex<JobRecordInner>>>>,
    providers: Mutex<HashMap<String, Arc<dyn LlmProvider>>>,
    config: DoctranConfig,
    events: Arc<dyn JobEventSink>,
}

impl Orchestrator {
    /// Builds an orchestrator around `config`, with no event sink.
    pub fn new(config: DoctranConfig) -> Self {
        Self::with_event_sink(config, Arc::new(NullEventSink))
    }

    /// Builds an orchestrator around `config`, reporting lifecycle events to `events`.
    pub fn with_event_sink(config: DoctranConfig, events: Arc<dyn JobEventSink>) -> Self {
        Self { jobs: Mutex::new(HashMap::new()), providers: Mutex::new(HashMap::new()), config, events }
    }

    /// Builds an orchestrator that dispatches every job to `provider`
    /// directly instead of building one from `config.provider`, bypassing
    /// the shared provider table. Intended for tests that substitute a
    /// stub [`LlmProvider`] so a job never makes a real network connection.
    pub fn with_provider(config: DoctranConfig, provider: Arc<dyn LlmProvider>) -> Self {
        let mut providers = HashMap::new();
        providers.insert(provider_key(&config.provider), provider);
        Self { jobs: Mutex::new(HashMap::new()), providers: Mutex::new(providers), config, events: Arc::new(NullEventSink) }
    }

    async fn provider_for(&self) -> Result<Arc<dyn LlmProvider>, DoctranError> {
        let key = provider_key(&self.config.provider);
        let mut providers = self.providers.lock().await;
        if let Some(existing) = providers.get(&key) {
            return Ok(Arc::clone(existing));
        }
        let built: Arc<dyn LlmProvider> =
            Arc::from(provider::create_provider(&self.config).map_err(DoctranError::Provider)?);
        providers.insert(key, Arc::clone(&built));
        Ok(built)
    }

    /// Submits `config` for translation, spawning its worker task and
    /// returning its id immediately. The job starts in [`JobStatus::Queued`]
    /// and transitions to [`JobStatus::Running`] once its worker starts.
    pub async fn submit(self: &Arc<Self>, job_config: JobConfig) -> JobId {
        let id = JobId::new();
        let inner = Arc::new(Mutex::new(JobRecordInner {
            status: JobStatus::Queued,
            progress: 0.0,
            stats: JobStats::default(),
            started_at: Utc::now(),
            finished_at: None,
            error: None,
            cancel: CancellationToken::new(),
        }));
        self.jobs.lock().await.insert(id, Arc::clone(&inner));

        let orchestrator = Arc::clone(self);
        tokio::spawn(async move {
            run_job(orchestrator, id, inner, job_config).await;
        });

        id
    }

    /// Requests cooperative cancellation of `id`. Returns `false` if the job
    /// is unknown or already in a terminal state.
    pub async fn interrupt(&self, id: JobId) -> bool {
        let jobs = self.jobs.lock().await;
        let Some(record) = jobs.get(&id) else { return false };
        let mut record = record.lock().await;
        if matches!(record.status, JobStatus::Queued | JobStatus::Running) {
            record.cancel.cancel();
            true
        } else {
            false
        }
    }

    /// Returns a deep-copied snapshot of `id`'s current state, or `None` if unknown.
    pub async fn status(&self, id: JobId) -> Option<JobSnapshot> {
        let jobs = self.jobs.lock().await;
        let record = jobs.get(&id)?;
        let record = record.lock().await;
        Some(snapshot_of(id, &record))
    }

    /// Lists every known job, most recently submitted first.
    pub async fn list(&self) -> Vec<JobSummary> {
        let jobs = self.jobs.lock().await;
        let mut out = Vec::with_capacity(jobs.len());
        for (&id, record) in jobs.iter() {
            let record = record.lock().await;
            out.push(JobSummary { id, status: record.status, progress: record.progress, started_at: record.started_at });
        }
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        out
    }
}

fn snapshot_of(id: JobId, record: &JobRecordInner) -> JobSnapshot {
    JobSnapshot {
        id,
        status: record.status,
        progress: record.progress,
        stats: record.stats,
        started_at: record.started_at,
        finished_at: record.finished_at,
        error: record.error.clone(),
    }
}

async fn set_terminal(
    record: &Arc<Mutex<JobRecordInner>>,
    id: JobId,
    events: &Arc<dyn JobEventSink>,
    status: JobStatus,
    error: Option<String>,
) {
    let mut guard = record.lock().await;
    guard.status = status;
    guard.finished_at = Some(Utc::now());
    guard.error = error;
    let snapshot = snapshot_of(id, &guard);
    drop(guard);
    events.on_terminal(id, &snapshot);
}

async fn run_job(orchestrator: Arc<Orchestrator>, id: JobId, record: Arc<Mutex<JobRecordInner>>, job_config: JobConfig) {
    {
        let mut guard = record.lock().await;
        guard.status = JobStatus::Running;
    }

    let provider = match orchestrator.provider_for().await {
        Ok(p) => p,
        Err(e) => {
            set_terminal(&record, id, &orchestrator.events, JobStatus::Error, Some(e.to_string())).await;
            return;
        }
    };

    let cancel = { record.lock().await.cancel.clone() };
    let options = TranslationOptions {
        source_language: &job_config.source_language,
        target_language: &job_config.target_language,
        custom_instructions: &job_config.custom_instructions,
        enable_post_processing: job_config.enable_post_processing,
        post_processing_instructions: &job_config.post_processing_instructions,
        rolling_context_words: orchestrator.config.chunk.rolling_context_words,
    };
    let post_processor = PostProcessor::default();

    let result: Result<Vec<u8>, DoctranError> = match job_config.kind {
        DocumentKind::PlainText => {
            translate_plain_text(&job_config, provider.as_ref(), &orchestrator.config, &options, &post_processor, &cancel, &record, id, &orchestrator.events).await
        }
        DocumentKind::Epub => {
            translate_epub_job(&job_config, provider.as_ref(), &orchestrator.config, &options, &post_processor, &cancel, &record, id, &orchestrator.events).await
        }
        DocumentKind::Srt => {
            translate_srt_job(&job_config, provider.as_ref(), &orchestrator.config, &options, &post_processor, &cancel, &record, id, &orchestrator.events).await
        }
    };

    match result {
        Ok(output) => match tokio::fs::write(&job_config.output_path, &output).await {
            Ok(()) => {
                let status = if cancel.is_cancelled() { JobStatus::Interrupted } else { JobStatus::Completed };
                set_terminal(&record, id, &orchestrator.events, status, None).await;
            }
            Err(e) => {
                set_terminal(&record, id, &orchestrator.events, JobStatus::Error, Some(format!("failed to write output: {e}"))).await;
            }
        },
        Err(e) => {
            set_terminal(&record, id, &orchestrator.events, JobStatus::Error, Some(e.to_string())).await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn translate_plain_text(
    job_config: &JobConfig,
    provider: &dyn LlmProvider,
    config: &DoctranConfig,
    options: &TranslationOptions<'_>,
    post_processor: &PostProcessor,
    cancel: &CancellationToken,
    record: &Arc<Mutex<JobRecordInner>>,
    id: JobId,
    events: &Arc<dyn JobEventSink>,
) -> Result<Vec<u8>, DoctranError> {
    let text = String::from_utf8_lossy(&job_config.source).into_owned();
    let mut chunks = crate::chunk::split_into_chunks(&text, config.chunk.main_lines_per_chunk);
    if chunks.is_empty() && !text.trim().is_empty() {
        chunks.push(crate::chunk::Chunk {
            context_before: String::new(),
            main_content: text.clone(),
            context_after: String::new(),
        });
    }
    let total = chunks.len();

    let outputs = engine::translate_chunks(
        &chunks,
        provider,
        options,
        post_processor,
        cancel,
        |progress| report_progress(record, id, events, progress),
        |outcome| report_chunk_outcome(record, outcome, total),
    )
    .await;

    report_snapshot(record, id, events).await;
    Ok(outputs.join("\n").into_bytes())
}

#[allow(clippy::too_many_arguments)]
async fn translate_epub_job(
    job_config: &JobConfig,
    provider: &dyn LlmProvider,
    config: &DoctranConfig,
    options: &TranslationOptions<'_>,
    post_processor: &PostProcessor,
    cancel: &CancellationToken,
    record: &Arc<Mutex<JobRecordInner>>,
    id: JobId,
    events: &Arc<dyn JobEventSink>,
) -> Result<Vec<u8>, DoctranError> {
    let output = epub::translate_epub(
        &job_config.source,
        provider,
        config.chunk.main_lines_per_chunk,
        options,
        post_processor,
        cancel,
        |progress| report_progress(record, id, events, progress),
        |stats: EpubStats| report_stats(record, stats.completed, stats.failed, stats.total),
    )
    .await
    .map_err(DoctranError::Epub)?;

    report_snapshot(record, id, events).await;
    Ok(output)
}

#[allow(clippy::too_many_arguments)]
async fn translate_srt_job(
    job_config: &JobConfig,
    provider: &dyn LlmProvider,
    config: &DoctranConfig,
    options: &TranslationOptions<'_>,
    post_processor: &PostProcessor,
    cancel: &CancellationToken,
    record: &Arc<Mutex<JobRecordInner>>,
    id: JobId,
    events: &Arc<dyn JobEventSink>,
) -> Result<Vec<u8>, DoctranError> {
    let content = String::from_utf8_lossy(&job_config.source).into_owned();
    let output = srt::translate_srt(
        &content,
        provider,
        config.srt.lines_per_block,
        config.srt.max_chars_per_block,
        options,
        post_processor,
        cancel,
        |progress| report_progress(record, id, events, progress),
        |stats: SrtStats| report_stats(record, stats.completed, stats.failed, stats.total),
    )
    .await
    .map_err(DoctranError::Srt)?;

    report_snapshot(record, id, events).await;
    Ok(output.into_bytes())
}

fn report_progress(record: &Arc<Mutex<JobRecordInner>>, id: JobId, events: &Arc<dyn JobEventSink>, progress: f64) {
    let record = Arc::clone(record);
    let events = Arc::clone(events);
    tokio::spawn(async move {
        let mut guard = record.lock().await;
        guard.progress = guard.progress.max(progress);
        let snapshot = snapshot_of(id, &guard);
        drop(guard);
        events.on_progress(id, &snapshot);
    });
}

fn report_chunk_outcome(record: &Arc<Mutex<JobRecordInner>>, outcome: ChunkOutcome, total: usize) {
    let record = Arc::clone(record);
    tokio::spawn(async move {
        let mut guard = record.lock().await;
        guard.stats.total = total;
        guard.stats.completed = guard.stats.completed.saturating_add(1);
        if matches!(outcome, ChunkOutcome::Failed) {
            guard.stats.failed = guard.stats.failed.saturating_add(1);
        }
    });
}

fn report_stats(record: &Arc<Mutex<JobRecordInner>>, completed: usize, failed: usize, total: usize) {
    let record = Arc::clone(record);
    tokio::spawn(async move {
        let mut guard = record.lock().await;
        guard.stats = JobStats { completed, failed, total };
    });
}

async fn report_snapshot(record: &Arc<Mutex<JobRecordInner>>, id: JobId, events: &Arc<dyn JobEventSink>) {
    let guard = record.lock().await;
    let snapshot = snapshot_of(id, &guard);
    drop(guard);
    events.on_progress(id, &snapshot);
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::provider::ProviderError;

    struct EchoProvider {
        delay: std::time::Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for EchoProvider {
        async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(format!("<TRANSLATED>{prompt}</TRANSLATED>"))
        }

        fn model_id(&self) -> &str {
            "echo"
        }
    }

    fn test_config() -> DoctranConfig {
        DoctranConfig::default()
    }

    fn test_orchestrator(delay: std::time::Duration) -> Arc<Orchestrator> {
        let config = test_config();
        let provider: Arc<dyn LlmProvider> = Arc::new(EchoProvider { delay, calls: AtomicUsize::new(0) });
        Arc::new(Orchestrator::with_provider(config, provider))
    }

    fn plain_text_config(output_path: std::path::PathBuf) -> JobConfig {
        JobConfig {
            kind: DocumentKind::PlainText,
            source: "Line one.\nLine two.\nLine three.\n".repeat(10).into_bytes(),
            output_path,
            source_language: "English".to_string(),
            target_language: "French".to_string(),
            custom_instructions: String::new(),
            enable_post_processing: false,
            post_processing_instructions: String::new(),
        }
    }

    /// Echoes back the chunk payload it was asked to translate, wrapped in
    /// the expected output markers, instead of `EchoProvider`'s whole-prompt
    /// echo -- lets a test assert on the exact reassembled output text.
    struct PassthroughProvider;

    #[async_trait]
    impl LlmProvider for PassthroughProvider {
        async fn generate(&self, prompt: &str) -> Result<String, ProviderError> {
            let start = prompt
                .find(crate::prompt::INPUT_TAG_IN)
                .map(|i| i.saturating_add(crate::prompt::INPUT_TAG_IN.len()));
            let end = prompt.find(crate::prompt::INPUT_TAG_OUT);
            let payload = match (start, end) {
                (Some(s), Some(e)) if s <= e => prompt[s..e].trim(),
                _ => "",
            };
            Ok(format!("<TRANSLATED>{payload}</TRANSLATED>"))
        }

        fn model_id(&self) -> &str {
            "passthrough"
        }
    }

    async fn wait_for_terminal(orchestrator: &Orchestrator, id: JobId) -> JobSnapshot {
        let mut snapshot = orchestrator.status(id).await.expect("job exists");
        for _ in 0..200 {
            if matches!(snapshot.status, JobStatus::Completed | JobStatus::Interrupted | JobStatus::Error) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            snapshot = orchestrator.status(id).await.expect("job exists");
        }
        snapshot
    }

    #[tokio::test]
    async fn plain_text_honors_configured_chunk_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        let source = "A.\nB.\nC.\nD.\n";

        let default_provider: Arc<dyn LlmProvider> =
            Arc::new(EchoProvider { delay: std::time::Duration::from_millis(0), calls: AtomicUsize::new(0) });
        let default_orchestrator = Arc::new(Orchestrator::with_provider(DoctranConfig::default(), default_provider));
        let default_id = default_orchestrator
            .submit(JobConfig { source: source.as_bytes().to_vec(), ..plain_text_config(dir.path().join("default.txt")) })
            .await;
        let default_snapshot = wait_for_terminal(&default_orchestrator, default_id).await;
        assert!(matches!(default_snapshot.status, JobStatus::Completed));
        assert_eq!(default_snapshot.stats.total, 1, "default chunk size keeps a 4-line document in one chunk");

        let mut small_chunk_config = DoctranConfig::default();
        small_chunk_config.chunk.main_lines_per_chunk = 2;
        let small_provider: Arc<dyn LlmProvider> =
            Arc::new(EchoProvider { delay: std::time::Duration::from_millis(0), calls: AtomicUsize::new(0) });
        let small_orchestrator = Arc::new(Orchestrator::with_provider(small_chunk_config, small_provider));
        let small_id = small_orchestrator
            .submit(JobConfig { source: source.as_bytes().to_vec(), ..plain_text_config(dir.path().join("small.txt")) })
            .await;
        let small_snapshot = wait_for_terminal(&small_orchestrator, small_id).await;
        assert!(matches!(small_snapshot.status, JobStatus::Completed));
        assert_eq!(small_snapshot.stats.total, 2, "chunk_size=2 splits the same document into two chunks");
    }

    #[tokio::test]
    async fn plain_text_joins_translated_chunks_with_newline() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output_path = dir.path().join("out.txt");
        let mut config = DoctranConfig::default();
        config.chunk.main_lines_per_chunk = 2;
        let provider: Arc<dyn LlmProvider> = Arc::new(PassthroughProvider);
        let orchestrator = Arc::new(Orchestrator::with_provider(config, provider));

        let source = "A.\nB.\nC.\nD.\n";
        let id = orchestrator
            .submit(JobConfig { source: source.as_bytes().to_vec(), ..plain_text_config(output_path.clone()) })
            .await;
        let snapshot = wait_for_terminal(&orchestrator, id).await;
        assert!(matches!(snapshot.status, JobStatus::Completed));

        let output = std::fs::read_to_string(&output_path).expect("output written");
        assert_eq!(output, "A.\nB.\nC.\nD.");
    }

    #[tokio::test]
    async fn submit_then_status_reaches_completed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output_path = dir.path().join("out.txt");
        let orchestrator = test_orchestrator(std::time::Duration::from_millis(0));
        let id = orchestrator.submit(plain_text_config(output_path.clone())).await;

        let mut snapshot = orchestrator.status(id).await.expect("job exists");
        for _ in 0..200 {
            if matches!(snapshot.status, JobStatus::Completed | JobStatus::Error) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            snapshot = orchestrator.status(id).await.expect("job exists");
        }

        assert!(matches!(snapshot.status, JobStatus::Completed));
        assert!(output_path.exists());
    }

    #[tokio::test]
    async fn interrupt_unknown_job_returns_false() {
        let orchestrator = test_orchestrator(std::time::Duration::from_millis(0));
        assert!(!orchestrator.interrupt(JobId::new()).await);
    }

    #[tokio::test]
    async fn interrupt_after_terminal_returns_false() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output_path = dir.path().join("out.txt");
        let orchestrator = test_orchestrator(std::time::Duration::from_millis(0));
        let id = orchestrator.submit(plain_text_config(output_path)).await;

        let mut snapshot = orchestrator.status(id).await.expect("job exists");
        for _ in 0..200 {
            if matches!(snapshot.status, JobStatus::Completed | JobStatus::Error) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            snapshot = orchestrator.status(id).await.expect("job exists");
        }

        assert!(!orchestrator.interrupt(id).await);
    }

    #[tokio::test]
    async fn list_reports_submitted_jobs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let orchestrator = test_orchestrator(std::time::Duration::from_millis(0));
        let _id = orchestrator.submit(plain_text_config(dir.path().join("a.txt"))).await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        let jobs = orchestrator.list().await;
        assert_eq!(jobs.len(), 1);
    }

    #[tokio::test]
    async fn interrupt_during_run_marks_job_interrupted_with_partial_progress() {
        let dir = tempfile::tempdir().expect("tempdir");
        let output_path = dir.path().join("out.txt");
        // Each chunk's translation sleeps long enough that the job is still
        // running when `interrupt` is called (spec.md §8 scenario 6).
        let orchestrator = test_orchestrator(std::time::Duration::from_millis(50));
        let big_source = "Line one.\nLine two.\nLine three.\n".repeat(200);
        let id = orchestrator
            .submit(JobConfig { source: big_source.into_bytes(), ..plain_text_config(output_path.clone()) })
            .await;

        tokio::time::sleep(std::time::Duration::from_millis(80)).await;
        assert!(orchestrator.interrupt(id).await);

        let mut snapshot = orchestrator.status(id).await.expect("job exists");
        for _ in 0..200 {
            if matches!(snapshot.status, JobStatus::Interrupted | JobStatus::Completed | JobStatus::Error) {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            snapshot = orchestrator.status(id).await.expect("job exists");
        }

        assert!(matches!(snapshot.status, JobStatus::Interrupted));
        assert!(snapshot.progress < 100.0);
        assert!(output_path.exists());
    }
}
