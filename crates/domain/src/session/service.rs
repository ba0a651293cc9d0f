//! Session service providing a simplified API for design session operations.

use common::{AggregateId, OwnerId};
use event_store::{EventEnvelope, EventStore};

use crate::aggregate::Aggregate;
use crate::command::{CommandHandler, CommandResult};
use crate::error::DomainError;
use crate::reason::ReasonCode;

use super::{
    AssetId, CheckoutDraft, DesignAsset, DesignSession, ProductSelection, Stage, StyleHints,
};

/// Service for managing design sessions.
///
/// Like [`OrderService`](crate::order::OrderService), every write is a
/// conditional append at the loaded version.
pub struct SessionService<S: EventStore> {
    handler: CommandHandler<S, DesignSession>,
}

impl<S: EventStore> SessionService<S> {
    pub fn new(store: S) -> Self {
        Self {
            handler: CommandHandler::new(store),
        }
    }

    pub fn handler(&self) -> &CommandHandler<S, DesignSession> {
        &self.handler
    }

    /// Creates a new session with a fresh id.
    #[tracing::instrument(skip(self, prompt, style_hints))]
    pub async fn create_session(
        &self,
        owner: Option<OwnerId>,
        prompt: String,
        style_hints: StyleHints,
        locale: String,
    ) -> Result<CommandResult<DesignSession>, DomainError> {
        let session_id = AggregateId::new();
        self.handler
            .execute(session_id, |session| {
                session.create(session_id, owner, prompt, style_hints, locale)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn start_generation(
        &self,
        session_id: AggregateId,
        job_handle: String,
    ) -> Result<CommandResult<DesignSession>, DomainError> {
        self.handler
            .execute_existing(session_id, |session| session.start_generation(job_handle))
            .await
    }

    #[tracing::instrument(skip(self, message))]
    pub async fn advance(
        &self,
        session_id: AggregateId,
        from: Stage,
        to: Stage,
        progress: u8,
        message: String,
    ) -> Result<CommandResult<DesignSession>, DomainError> {
        self.handler
            .execute_existing(session_id, |session| {
                session.advance(from, to, progress, message)
            })
            .await
    }

    #[tracing::instrument(skip(self, message))]
    pub async fn report_progress(
        &self,
        session_id: AggregateId,
        stage: Stage,
        progress: u8,
        message: String,
    ) -> Result<CommandResult<DesignSession>, DomainError> {
        self.handler
            .execute_existing(session_id, |session| {
                session.report_progress(stage, progress, message)
            })
            .await
    }

    /// Records several assets in one append.
    #[tracing::instrument(skip(self, assets), fields(count = assets.len()))]
    pub async fn record_assets(
        &self,
        session_id: AggregateId,
        assets: Vec<DesignAsset>,
    ) -> Result<CommandResult<DesignSession>, DomainError> {
        self.handler
            .execute_existing(session_id, |session| {
                let mut staged = session.clone();
                let mut events = Vec::new();
                for asset in assets {
                    let new_events = staged.record_asset(asset)?;
                    staged.apply_events(new_events.clone());
                    events.extend(new_events);
                }
                Ok(events)
            })
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn select_asset(
        &self,
        session_id: AggregateId,
        asset_id: AssetId,
    ) -> Result<CommandResult<DesignSession>, DomainError> {
        self.handler
            .execute_existing(session_id, |session| session.select_asset(asset_id))
            .await
    }

    #[tracing::instrument(skip(self, message))]
    pub async fn fail(
        &self,
        session_id: AggregateId,
        stage: Stage,
        reason: ReasonCode,
        message: String,
    ) -> Result<CommandResult<DesignSession>, DomainError> {
        self.handler
            .execute_existing(session_id, |session| session.fail(stage, reason, message))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn requeue(
        &self,
        session_id: AggregateId,
        max_retries: u32,
    ) -> Result<CommandResult<DesignSession>, DomainError> {
        self.handler
            .execute_existing(session_id, |session| session.requeue(max_retries))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn assign_owner(
        &self,
        session_id: AggregateId,
        owner: OwnerId,
    ) -> Result<CommandResult<DesignSession>, DomainError> {
        self.handler
            .execute_existing(session_id, |session| session.assign_owner(owner))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn select_product(
        &self,
        session_id: AggregateId,
        selection: ProductSelection,
    ) -> Result<CommandResult<DesignSession>, DomainError> {
        self.handler
            .execute_existing(session_id, |session| session.select_product(selection))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn abandon(
        &self,
        session_id: AggregateId,
    ) -> Result<CommandResult<DesignSession>, DomainError> {
        self.handler
            .execute_existing(session_id, |session| session.abandon())
            .await
    }

    #[tracing::instrument(skip(self, nonce))]
    pub async fn record_consent(
        &self,
        session_id: AggregateId,
        consent: bool,
        nonce: String,
    ) -> Result<CommandResult<DesignSession>, DomainError> {
        self.handler
            .execute_existing(session_id, |session| session.record_consent(consent, nonce))
            .await
    }

    #[tracing::instrument(skip(self, checkout), fields(payment_ref = %checkout.payment_ref))]
    pub async fn initiate_checkout(
        &self,
        session_id: AggregateId,
        checkout: CheckoutDraft,
    ) -> Result<CommandResult<DesignSession>, DomainError> {
        self.handler
            .execute_existing(session_id, |session| session.initiate_checkout(checkout))
            .await
    }

    #[tracing::instrument(skip(self, nonce))]
    pub async fn consume_approval(
        &self,
        session_id: AggregateId,
        nonce: String,
        order_id: AggregateId,
    ) -> Result<CommandResult<DesignSession>, DomainError> {
        self.handler
            .execute_existing(session_id, |session| {
                session.consume_approval(&nonce, order_id)
            })
            .await
    }

    /// Loads a session by ID.
    ///
    /// Returns None if the session doesn't exist.
    pub async fn get_session(
        &self,
        session_id: AggregateId,
    ) -> Result<Option<DesignSession>, DomainError> {
        self.handler.load_existing(session_id).await
    }

    /// Loads every session, oldest first.
    pub async fn list_sessions(&self) -> Result<Vec<DesignSession>, DomainError> {
        self.handler.list().await
    }

    pub async fn history(
        &self,
        session_id: AggregateId,
    ) -> Result<Vec<EventEnvelope>, DomainError> {
        self.handler.history(session_id).await
    }
}
