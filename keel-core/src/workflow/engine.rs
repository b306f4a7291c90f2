//! Workflow engine: owns sessions and drives the stage pipeline

use chrono::Utc;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::events::{EventBus, WorkflowEvent, WorkflowEventKind};
use super::result::{ErrorCode, StageError, StageFailure, StageResult};
use super::session::{Progress, Session, SessionInput, SessionStatus, StepRecord, StepStatus};
use super::stage::{Stage, StageContext, StageServices};
use super::store::{SessionSlot, SessionStore};
use crate::config::{ContinuationPolicy, KeelConfig};
use crate::error::{KeelError, Result};
use crate::llm::LLMProviderFactory;
use crate::render::{CsvTableExporter, SvgChartRenderer};
use crate::stages::{self, default_pipeline};

/// Runs sessions through an ordered stage pipeline.
///
/// Each executed stage appends exactly one [`StepRecord`] and advances
/// `current_step`, whatever the outcome. A failure of the first stage, a
/// failure the stage marks fatal, or any failure under
/// [`ContinuationPolicy::Strict`] ends the session as
/// [`SessionStatus::Failed`]. Otherwise the session runs all stages and
/// completes.
///
/// # Example
///
/// ```rust,ignore
/// use keel_core::prelude::*;
///
/// let engine = WorkflowEngine::from_config(KeelConfig::load()?)?;
/// let input = SessionInput::manual(ManualEntry::new("Boston Whaler", "Outrage 23"));
/// let session = engine.start_and_run(input).await?;
/// assert_eq!(session.step_results.len(), 6);
/// ```
pub struct WorkflowEngine {
    pipeline: Vec<Arc<dyn Stage>>,
    services: StageServices,
    store: SessionStore,
    events: EventBus,
}

impl WorkflowEngine {
    /// Engine running the standard six-stage pipeline
    pub fn new(services: StageServices) -> Self {
        Self::with_pipeline(services, default_pipeline())
    }

    /// Engine running a custom pipeline
    pub fn with_pipeline(services: StageServices, pipeline: Vec<Arc<dyn Stage>>) -> Self {
        let events = EventBus::new(services.config.workflow.event_buffer);
        Self {
            pipeline,
            services,
            store: SessionStore::new(),
            events,
        }
    }

    /// Build an engine with the configured inference provider, the SVG chart
    /// renderer and the CSV exporter.
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::Configuration`] for invalid settings and
    /// [`KeelError::Inference`] when no provider can be created.
    pub fn from_config(config: KeelConfig) -> Result<Self> {
        config.validate()?;
        let provider = LLMProviderFactory::create(&config.llm)?;
        let services = StageServices::new(
            provider,
            Arc::new(SvgChartRenderer::new()),
            Arc::new(CsvTableExporter::new()),
            config,
        );
        Ok(Self::new(services))
    }

    pub fn services(&self) -> &StageServices {
        &self.services
    }

    /// Stage names in execution order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.pipeline.iter().map(|s| s.name()).collect()
    }

    /// Receive lifecycle events for every session
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.events.subscribe()
    }

    /// Create a session and return its id. No stage runs yet.
    pub async fn start(&self, input: SessionInput) -> Result<String> {
        let session = Session::new(input);
        let id = self.store.insert(session).await;

        info!(session_id = %id, stages = self.pipeline.len(), "Session created");
        self.events.publish(&id, WorkflowEventKind::SessionStarted);
        Ok(id)
    }

    /// Run the next stage of a session
    ///
    /// # Errors
    ///
    /// - [`KeelError::SessionNotFound`] for unknown ids
    /// - [`KeelError::SessionFinished`] once the session is COMPLETED or FAILED
    /// - [`KeelError::Cancelled`] when the session was cancelled before this stage
    pub async fn step(&self, session_id: &str) -> Result<StepRecord> {
        let slot = self.store.get(session_id).await?;
        let _exec = slot.exec.lock().await;
        self.step_locked(&slot).await
    }

    /// Run the remaining stages of a session and return its final state
    pub async fn run(&self, session_id: &str) -> Result<Session> {
        let slot = self.store.get(session_id).await?;
        let _exec = slot.exec.lock().await;

        while !slot.session.read().await.status.is_finished() {
            match self.step_locked(&slot).await {
                Ok(_) => {}
                Err(KeelError::Cancelled(_)) => break,
                Err(e) => return Err(e),
            }
        }

        Ok(slot.session.read().await.clone())
    }

    /// Create a session and run it to completion
    pub async fn start_and_run(&self, input: SessionInput) -> Result<Session> {
        let id = self.start(input).await?;
        self.run(&id).await
    }

    /// Run a session on a background task
    pub fn spawn_run(self: &Arc<Self>, session_id: impl Into<String>) -> JoinHandle<Result<Session>> {
        let engine = Arc::clone(self);
        let session_id = session_id.into();
        tokio::spawn(async move { engine.run(&session_id).await })
    }

    /// Current snapshot of a session
    pub async fn status(&self, session_id: &str) -> Result<Session> {
        let slot = self.store.get(session_id).await?;
        let session = slot.session.read().await;
        Ok(session.clone())
    }

    pub async fn progress(&self, session_id: &str) -> Result<Progress> {
        let slot = self.store.get(session_id).await?;
        let session = slot.session.read().await;
        let total = self.pipeline.len();

        let percent = if total == 0 {
            100.0
        } else {
            session.current_step as f64 / total as f64 * 100.0
        };
        let next_stage = if session.status.is_finished() {
            None
        } else {
            self.pipeline
                .get(session.current_step)
                .map(|s| s.name().to_string())
        };

        Ok(Progress {
            session_id: session.session_id.clone(),
            status: session.status,
            current_step: session.current_step,
            total_steps: total,
            percent_complete: percent,
            next_stage,
            last_stage: session.last_step().map(|r| r.stage_name.clone()),
        })
    }

    /// Request cancellation.
    ///
    /// An idle session ends FAILED immediately, moving through RUNNING if no
    /// stage has run yet. A session with a stage in flight lets that stage
    /// finish and ends before the next one.
    pub async fn cancel(&self, session_id: &str) -> Result<()> {
        let slot = self.store.get(session_id).await?;
        slot.token.cancel();
        info!(session_id = %session_id, "Cancellation requested");

        if let Ok(_exec) = slot.exec.try_lock() {
            let mut session = slot.session.write().await;
            if !session.status.is_finished() {
                self.finish(&mut session, SessionStatus::Failed, Some("cancelled".into()));
            }
        }
        Ok(())
    }

    /// Drop a session from the store and return its last state
    pub async fn remove(&self, session_id: &str) -> Result<Session> {
        let slot = self.store.remove(session_id).await?;
        slot.token.cancel();

        info!(session_id = %session_id, "Session removed");
        self.events.publish(session_id, WorkflowEventKind::SessionRemoved);
        let session = slot.session.read().await;
        Ok(session.clone())
    }

    /// Performance curves of a session as CSV text
    ///
    /// # Errors
    ///
    /// Returns [`KeelError::NotAvailable`] when the curve stage has not
    /// succeeded for this session.
    pub async fn export_performance_csv(&self, session_id: &str) -> Result<String> {
        let slot = self.store.get(session_id).await?;
        let session = slot.session.read().await;
        let curves = session
            .output(stages::PERFORMANCE_CURVES)
            .and_then(|o| o.as_curves())
            .ok_or_else(|| {
                KeelError::NotAvailable(format!("session {} has no performance curves", session_id))
            })?;

        Ok(self.services.exporter.to_csv(&curves.table())?)
    }

    /// Number of sessions held in memory
    pub async fn session_count(&self) -> usize {
        self.store.len().await
    }

    /// Evict sessions idle longer than the configured TTL
    pub async fn evict_idle(&self) -> usize {
        let evicted = self
            .store
            .evict_idle(self.services.config.workflow.session_ttl)
            .await;
        for id in &evicted {
            debug!(session_id = %id, "Evicted idle session");
            self.events.publish(id, WorkflowEventKind::SessionRemoved);
        }
        evicted.len()
    }

    /// Periodically evict idle sessions until the engine is dropped
    pub fn spawn_reaper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let engine = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                let evicted = engine.evict_idle().await;
                if evicted > 0 {
                    info!(evicted, "Reaped idle sessions");
                }
            }
        })
    }

    /// Run one stage; the caller holds the session's execution lock
    async fn step_locked(&self, slot: &SessionSlot) -> Result<StepRecord> {
        let (index, session_id) = {
            let mut session = slot.session.write().await;
            if session.status.is_finished() {
                return Err(KeelError::SessionFinished(session.session_id.clone()));
            }
            if slot.token.is_cancelled() {
                self.finish(&mut session, SessionStatus::Failed, Some("cancelled".into()));
                return Err(KeelError::Cancelled(session.session_id.clone()));
            }
            if session.current_step >= self.pipeline.len() {
                self.finish(&mut session, SessionStatus::Completed, None);
                return Err(KeelError::SessionFinished(session.session_id.clone()));
            }
            self.begin(&mut session);
            (session.current_step, session.session_id.clone())
        };

        let stage = Arc::clone(&self.pipeline[index]);
        info!(session_id = %session_id, stage = stage.name(), step = index, "Stage started");
        self.events.publish(
            &session_id,
            WorkflowEventKind::StageStarted {
                stage: stage.name().to_string(),
                step: index,
            },
        );

        let started_at = Utc::now();
        let result = {
            let session = slot.session.read().await;
            self.execute_stage(stage.as_ref(), &session).await
        };
        let record = StepRecord::new(stage.name(), result, started_at, Utc::now());

        match &record.result {
            StageResult::Success(_) => info!(
                session_id = %session_id,
                stage = stage.name(),
                duration_ms = record.duration_ms,
                "Stage succeeded"
            ),
            StageResult::Failed(failure) => warn!(
                session_id = %session_id,
                stage = stage.name(),
                error_code = %failure.error_code,
                error = %failure.error,
                "Stage failed"
            ),
        }

        let mut session = slot.session.write().await;
        session.record(record.clone());
        self.events.publish(
            &session_id,
            WorkflowEventKind::StageCompleted {
                stage: record.stage_name.clone(),
                step: index,
                status: record.status,
                error_code: record.result.error_code(),
            },
        );
        self.apply_continuation(&mut session, index, &record);

        Ok(record)
    }

    async fn execute_stage(&self, stage: &dyn Stage, session: &Session) -> StageResult {
        let missing: Vec<&str> = stage
            .requires()
            .iter()
            .copied()
            .filter(|name| !session.context.contains_key(*name))
            .collect();
        if !missing.is_empty() {
            return StageResult::Failed(StageError::UpstreamMissing(missing.join(", ")).into());
        }

        let ctx = StageContext {
            session_id: &session.session_id,
            input: &session.input,
            outputs: &session.context,
            services: &self.services,
        };

        match AssertUnwindSafe(stage.execute(&ctx)).catch_unwind().await {
            Ok(result) => result.into(),
            Err(panic) => StageResult::Failed(StageFailure {
                error: format!("stage panicked: {}", panic_message(panic.as_ref())),
                error_code: ErrorCode::Internal,
                fatal: false,
            }),
        }
    }

    fn apply_continuation(&self, session: &mut Session, index: usize, record: &StepRecord) {
        if let StageResult::Failed(failure) = &record.result {
            let strict = self.services.config.workflow.continuation == ContinuationPolicy::Strict;
            if index == 0 || failure.fatal || strict {
                error!(
                    session_id = %session.session_id,
                    stage = %record.stage_name,
                    error_code = %failure.error_code,
                    "Stage failure ends session"
                );
                let reason = format!("{} failed: {}", record.stage_name, failure.error);
                self.finish(session, SessionStatus::Failed, Some(reason));
                return;
            }
        }

        if session.current_step >= self.pipeline.len() {
            let first_ok = session
                .step_results
                .first()
                .is_some_and(|r| r.status == StepStatus::Success);
            if first_ok {
                self.finish(session, SessionStatus::Completed, None);
            } else {
                self.finish(
                    session,
                    SessionStatus::Failed,
                    Some("first stage did not succeed".into()),
                );
            }
        }
    }

    fn begin(&self, session: &mut Session) {
        if session.begin() {
            debug!(session_id = %session.session_id, "Session running");
            self.events
                .publish(&session.session_id, WorkflowEventKind::SessionRunning);
        }
    }

    /// End a session, passing through RUNNING if it never started a stage
    fn finish(&self, session: &mut Session, status: SessionStatus, reason: Option<String>) {
        self.begin(session);
        session.finish(status, reason.clone());
        info!(
            session_id = %session.session_id,
            status = ?status,
            steps = session.current_step,
            "Session finished"
        );
        self.events.publish(
            &session.session_id,
            WorkflowEventKind::SessionFinished { status, reason },
        );
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedProvider;
    use crate::render::{CsvTableExporter, SvgChartRenderer};
    use crate::stages::*;
    use crate::workflow::result::StageOutput;
    use crate::workflow::session::ManualEntry;
    use async_trait::async_trait;

    fn services(config: KeelConfig) -> StageServices {
        StageServices::new(
            Arc::new(ScriptedProvider::new()),
            Arc::new(SvgChartRenderer::new()),
            Arc::new(CsvTableExporter::new()),
            config,
        )
    }

    struct Panicking;

    #[async_trait]
    impl Stage for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn execute(&self, _ctx: &StageContext<'_>) -> std::result::Result<StageOutput, StageError> {
            panic!("gauge exploded")
        }
    }

    struct Failing {
        fatal: bool,
    }

    #[async_trait]
    impl Stage for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn execute(&self, _ctx: &StageContext<'_>) -> std::result::Result<StageOutput, StageError> {
            let err = StageError::ComputeInvalid("negative".into());
            Err(if self.fatal { err.fatal() } else { err })
        }
    }

    fn manual_input() -> SessionInput {
        SessionInput::manual(ManualEntry::new("Boston Whaler", "Outrage 23"))
    }

    #[tokio::test]
    async fn test_panicking_stage_is_recorded_as_internal() {
        let pipeline: Vec<Arc<dyn Stage>> = vec![
            Arc::new(ImageAnalyzer::new()),
            Arc::new(Panicking),
        ];
        let engine = WorkflowEngine::with_pipeline(services(KeelConfig::default()), pipeline);
        let session = engine.start_and_run(manual_input()).await.unwrap();

        assert_eq!(session.step_results.len(), 2);
        let failure = session.step_results[1].result.failure().unwrap();
        assert_eq!(failure.error_code, ErrorCode::Internal);
        assert!(failure.error.contains("gauge exploded"));
        assert_eq!(session.status, SessionStatus::Completed);
    }

    #[tokio::test]
    async fn test_fatal_failure_stops_session() {
        let pipeline: Vec<Arc<dyn Stage>> = vec![
            Arc::new(ImageAnalyzer::new()),
            Arc::new(Failing { fatal: true }),
            Arc::new(Failing { fatal: false }),
        ];
        let engine = WorkflowEngine::with_pipeline(services(KeelConfig::default()), pipeline);
        let session = engine.start_and_run(manual_input()).await.unwrap();

        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.step_results.len(), 2);
        assert!(session.failure_reason.unwrap().starts_with("failing failed"));
    }

    #[tokio::test]
    async fn test_strict_policy_stops_on_any_failure() {
        let config = crate::config::ConfigBuilder::new()
            .continuation(ContinuationPolicy::Strict)
            .build();
        let pipeline: Vec<Arc<dyn Stage>> = vec![
            Arc::new(ImageAnalyzer::new()),
            Arc::new(Failing { fatal: false }),
            Arc::new(Failing { fatal: false }),
        ];
        let engine = WorkflowEngine::with_pipeline(services(config), pipeline);
        let session = engine.start_and_run(manual_input()).await.unwrap();

        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.current_step, 2);
    }

    #[tokio::test]
    async fn test_upstream_precheck() {
        let pipeline: Vec<Arc<dyn Stage>> = vec![
            Arc::new(ImageAnalyzer::new()),
            Arc::new(VoyageAnalyticsEngine::new()),
        ];
        let engine = WorkflowEngine::with_pipeline(services(KeelConfig::default()), pipeline);
        let session = engine.start_and_run(manual_input()).await.unwrap();

        let failure = session.step_results[1].result.failure().unwrap();
        assert_eq!(failure.error_code, ErrorCode::UpstreamMissing);
        assert!(failure.error.contains(PERFORMANCE_CURVES));
    }

    #[tokio::test]
    async fn test_cancel_idle_session() {
        let engine = WorkflowEngine::new(services(KeelConfig::default()));
        let id = engine.start(manual_input()).await.unwrap();
        engine.step(&id).await.unwrap();

        engine.cancel(&id).await.unwrap();
        let session = engine.status(&id).await.unwrap();
        assert_eq!(session.status, SessionStatus::Failed);
        assert_eq!(session.failure_reason.as_deref(), Some("cancelled"));
        assert_eq!(session.current_step, 1);
        assert!(matches!(
            engine.step(&id).await,
            Err(KeelError::SessionFinished(_))
        ));
    }

    #[tokio::test]
    async fn test_progress() {
        let engine = WorkflowEngine::new(services(KeelConfig::default()));
        let id = engine.start(manual_input()).await.unwrap();

        let progress = engine.progress(&id).await.unwrap();
        assert_eq!(progress.total_steps, 6);
        assert_eq!(progress.next_stage.as_deref(), Some(IMAGE_ANALYZER));
        assert_eq!(progress.last_stage, None);

        engine.step(&id).await.unwrap();
        let progress = engine.progress(&id).await.unwrap();
        assert_eq!(progress.status, SessionStatus::Running);
        assert_eq!(progress.next_stage.as_deref(), Some(PROFILE_BUILDER));
        assert!((progress.percent_complete - 100.0 / 6.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let engine = WorkflowEngine::new(services(KeelConfig::default()));
        assert!(matches!(
            engine.status("missing").await,
            Err(KeelError::SessionNotFound(_))
        ));
        assert!(matches!(
            engine.remove("missing").await,
            Err(KeelError::SessionNotFound(_))
        ));
    }
}
