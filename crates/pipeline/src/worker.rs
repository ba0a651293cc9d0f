//! Generation worker: drives design sessions through their stages.

use std::sync::Arc;

use chrono::Utc;
use common::AggregateId;
use domain::{
    Aggregate, AssetId, CommandResult, DesignAsset, DesignSession, DomainError, ReasonCode, SessionError,
    SessionService, Stage,
};
use event_store::EventStore;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, ProviderError, Result};
use crate::retry::retry_transient;
use crate::services::{
    GenerationRequest, GenerationResult, GenerationService, GenerationUpdate, JobHandle,
};

/// What one call to [`GenerationWorker::advance`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// The provider job was started and the session left `queued`.
    Started,
    /// The session moved one stage forward.
    Advanced { from: Stage, to: Stage },
    /// Progress rose within the current stage.
    Progressed { stage: Stage, progress: u8 },
    /// Nothing to do: terminal session, or no news from the provider.
    Unchanged,
    /// The session failed.
    Failed { reason: ReasonCode },
    /// Another writer got there first; this write was dropped.
    Superseded,
}

impl AdvanceOutcome {
    pub fn changed(&self) -> bool {
        !matches!(self, AdvanceOutcome::Unchanged | AdvanceOutcome::Superseded)
    }
}

/// Moves design sessions forward by polling the generation service.
///
/// Every write is conditional on the stage the worker loaded, so any number
/// of workers may advance the same session: at most one transition wins
/// and the rest are dropped as superseded.
pub struct GenerationWorker<S: EventStore> {
    sessions: SessionService<S>,
    generation: Arc<dyn GenerationService>,
    config: PipelineConfig,
}

impl<S: EventStore> GenerationWorker<S> {
    pub fn new(store: S, generation: Arc<dyn GenerationService>, config: PipelineConfig) -> Self {
        Self {
            sessions: SessionService::new(store),
            generation,
            config,
        }
    }

    /// Advances a session by at most one step. Safe to call repeatedly and
    /// concurrently.
    #[tracing::instrument(skip(self))]
    pub async fn advance(&self, session_id: AggregateId) -> Result<AdvanceOutcome> {
        let session = self.load(session_id).await?;
        if session.is_terminal() {
            return Ok(AdvanceOutcome::Unchanged);
        }

        match session.stage() {
            Stage::Queued => self.start(session_id, &session).await,
            stage => self.poll(session_id, &session, stage).await,
        }
    }

    /// Advances until the session is terminal.
    ///
    /// Meant to be spawned detached: the caller going away does not stop
    /// the session.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self, session_id: AggregateId) -> Result<Stage> {
        loop {
            let outcome = self.advance(session_id).await?;
            if let AdvanceOutcome::Failed { reason } = outcome {
                tracing::info!(%session_id, %reason, "generation stopped");
            }

            let session = self.load(session_id).await?;
            if session.is_terminal() {
                return Ok(session.stage());
            }
            if !outcome.changed() {
                tokio::time::sleep(self.config.poll_interval).await;
            }
        }
    }

    /// Requeues a failed session for another attempt.
    #[tracing::instrument(skip(self))]
    pub async fn retry(&self, session_id: AggregateId) -> Result<DesignSession> {
        self.load(session_id).await?;
        let result = self
            .sessions
            .requeue(session_id, self.config.max_session_retries)
            .await?;
        tracing::info!(
            %session_id,
            retry_count = result.aggregate.retry_count(),
            "session requeued"
        );
        Ok(result.aggregate)
    }

    /// Ids of sessions still in flight, oldest first. Abandoned sessions
    /// are included: abandoning stops UI actions, not generation.
    pub async fn resume_pending(&self) -> Result<Vec<AggregateId>> {
        let sessions = self.sessions.list_sessions().await?;
        Ok(sessions
            .iter()
            .filter(|s| !s.is_terminal())
            .filter_map(|s| s.id())
            .collect())
    }

    async fn load(&self, session_id: AggregateId) -> Result<DesignSession> {
        self.sessions
            .get_session(session_id)
            .await?
            .ok_or(PipelineError::SessionNotFound(session_id))
    }

    async fn start(&self, session_id: AggregateId, session: &DesignSession) -> Result<AdvanceOutcome> {
        let request = GenerationRequest {
            idempotency_key: format!("{session_id}:{}", session.retry_count()),
            prompt: session.prompt().to_string(),
            style_hints: session.style_hints().as_slice().to_vec(),
        };

        let job = match self
            .call(session_id, || self.generation.start_generation(request.clone()))
            .await
        {
            Ok(job) => job,
            Err(e) => return self.fail(session_id, Stage::Queued, e).await,
        };

        let written = self.sessions.start_generation(session_id, job.0).await;
        self.settle(session_id, written, AdvanceOutcome::Started)
    }

    async fn poll(
        &self,
        session_id: AggregateId,
        session: &DesignSession,
        stage: Stage,
    ) -> Result<AdvanceOutcome> {
        let Some(job) = session.job_handle().map(|j| JobHandle(j.to_string())) else {
            tracing::warn!(%session_id, %stage, "session in flight without a job");
            return Ok(AdvanceOutcome::Unchanged);
        };

        let update = match self.call(session_id, || self.generation.poll(&job)).await {
            Ok(update) => update,
            Err(e) => return self.fail(session_id, stage, e).await,
        };

        let provider_done = update.result.is_some() || update.stage == Stage::Ready;
        if update.stage.rank() <= stage.rank() && !provider_done {
            return self.report(session_id, stage, update).await;
        }

        // The provider is past this stage. Move exactly one step.
        let Some(next) = stage.next() else {
            return Ok(AdvanceOutcome::Unchanged);
        };
        if next == Stage::Ready {
            return self.finish(session_id, session, update).await;
        }

        let progress = if update.stage == next {
            update.progress
        } else {
            next.baseline()
        };
        let written = self
            .sessions
            .advance(session_id, stage, next, progress, update.message)
            .await;
        self.settle(session_id, written, AdvanceOutcome::Advanced { from: stage, to: next })
    }

    async fn report(
        &self,
        session_id: AggregateId,
        stage: Stage,
        update: GenerationUpdate,
    ) -> Result<AdvanceOutcome> {
        if update.stage != stage {
            return Ok(AdvanceOutcome::Unchanged);
        }
        let written = self
            .sessions
            .report_progress(session_id, stage, update.progress, update.message)
            .await;
        match written {
            Ok(result) if result.is_noop() => Ok(AdvanceOutcome::Unchanged),
            other => self.settle(
                session_id,
                other,
                AdvanceOutcome::Progressed {
                    stage,
                    progress: update.progress,
                },
            ),
        }
    }

    /// Records the finished assets, then moves `uploading → ready`.
    async fn finish(
        &self,
        session_id: AggregateId,
        session: &DesignSession,
        update: GenerationUpdate,
    ) -> Result<AdvanceOutcome> {
        let Some(GenerationResult::Completed(generated)) = update.result else {
            return Ok(AdvanceOutcome::Unchanged);
        };
        if generated.is_empty() {
            return self
                .fail(
                    session_id,
                    Stage::Uploading,
                    ProviderError::Rejected {
                        reason: ReasonCode::ProviderRejected,
                        message: "job completed without assets".to_string(),
                    },
                )
                .await;
        }

        let now = Utc::now();
        let fresh: Vec<DesignAsset> = generated
            .into_iter()
            .filter(|a| !session.assets().iter().any(|existing| existing.id.as_str() == a.id))
            .map(|a| DesignAsset {
                id: AssetId::new(a.id),
                session_id,
                preview_url: a.preview_url,
                mockup_urls: a.mockup_urls,
                notes: a.notes,
                created_at: now,
            })
            .collect();

        if !fresh.is_empty() {
            let recorded = self.sessions.record_assets(session_id, fresh).await;
            if let Err(e) = recorded {
                return self.drop_or_raise(session_id, e);
            }
        }

        let written = self
            .sessions
            .advance(session_id, Stage::Uploading, Stage::Ready, 100, update.message)
            .await;
        self.settle(
            session_id,
            written,
            AdvanceOutcome::Advanced {
                from: Stage::Uploading,
                to: Stage::Ready,
            },
        )
    }

    /// Fails the session with a customer-safe reason. The provider's own
    /// text only goes to the log.
    async fn fail(
        &self,
        session_id: AggregateId,
        stage: Stage,
        error: ProviderError,
    ) -> Result<AdvanceOutcome> {
        let reason = error.reason_code();
        tracing::warn!(%session_id, %stage, %reason, error = %error, "generation failed");

        let written = self
            .sessions
            .fail(session_id, stage, reason, reason.default_message().to_string())
            .await;
        let outcome = self.settle(session_id, written, AdvanceOutcome::Failed { reason })?;
        if outcome != AdvanceOutcome::Superseded {
            metrics::counter!("generation_sessions_failed_total", "reason" => reason.as_str())
                .increment(1);
        }
        Ok(outcome)
    }

    async fn call<T, F, Fut>(&self, session_id: AggregateId, op: F) -> std::result::Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, ProviderError>>,
    {
        retry_transient(
            self.config.max_stage_attempts,
            self.config.provider_timeout,
            &self.config.backoff,
            op,
            |attempt, e| {
                tracing::warn!(%session_id, attempt, error = %e, "generation provider call failed, retrying");
                metrics::counter!("generation_provider_retries_total").increment(1);
            },
        )
        .await
    }

    fn settle(
        &self,
        session_id: AggregateId,
        written: std::result::Result<CommandResult<DesignSession>, DomainError>,
        outcome: AdvanceOutcome,
    ) -> Result<AdvanceOutcome> {
        match written {
            Ok(_) => {
                if let AdvanceOutcome::Advanced { from, to } = &outcome {
                    tracing::info!(%session_id, %from, %to, "stage advanced");
                    metrics::counter!("generation_stage_transitions_total", "to" => to.as_str())
                        .increment(1);
                }
                Ok(outcome)
            }
            Err(e) => self.drop_or_raise(session_id, e),
        }
    }

    fn drop_or_raise(&self, session_id: AggregateId, error: DomainError) -> Result<AdvanceOutcome> {
        if is_stale_write(&error) {
            tracing::debug!(%session_id, error = %error, "conditional write dropped");
            metrics::counter!("conditional_writes_dropped_total", "aggregate" => "session")
                .increment(1);
            return Ok(AdvanceOutcome::Superseded);
        }
        Err(error.into())
    }
}

/// A write that lost to another writer, either at the store or because the
/// reloaded stage no longer matches.
fn is_stale_write(error: &DomainError) -> bool {
    error.is_conflict()
        || matches!(
            error.as_session(),
            Some(
                SessionError::StageMismatch { .. }
                    | SessionError::InvalidTransition { .. }
                    | SessionError::Terminal { .. }
                    | SessionError::DuplicateAsset { .. }
            )
        )
}
