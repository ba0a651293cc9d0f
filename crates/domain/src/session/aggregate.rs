//! Design session aggregate implementation.

use chrono::{DateTime, Utc};
use common::{AggregateId, OwnerId};
use event_store::Version;
use serde::{Deserialize, Serialize};

use crate::aggregate::Aggregate;
use crate::reason::{FailureInfo, ReasonCode};

use super::{
    AssetId, CheckoutDraft, DesignAsset, ProductSelection, SessionError, SessionEvent, Stage,
    StyleHints,
    events::{
        ApprovalConsumedData, AssetRecordedData, AssetSelectedData, CheckoutInitiatedData,
        ConsentRecordedData, GenerationStartedData, OwnerAssignedData, ProductSelectedData,
        SessionAbandonedData, SessionCreatedData, SessionRequeuedData,
    },
};

/// Design session aggregate root.
///
/// Holds the generation stage machine plus everything the customer does
/// with the result: picking an asset and product, approving it for print,
/// and checking out. Stages only move one step forward, to `Failed`, or
/// back to `Queued` through a requeue.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DesignSession {
    id: Option<AggregateId>,

    #[serde(default)]
    version: Version,

    owner: Option<OwnerId>,
    prompt: String,
    style_hints: StyleHints,
    locale: String,
    stage: Stage,
    progress: u8,
    message: String,
    error: Option<FailureInfo>,
    retry_count: u32,
    job_handle: Option<String>,
    assets: Vec<DesignAsset>,
    selected_asset_id: Option<AssetId>,
    product: Option<ProductSelection>,
    consent_accepted: bool,
    consent_accepted_at: Option<DateTime<Utc>>,
    approval_nonce: Option<String>,
    consumed_by_order: Option<AggregateId>,
    checkout: Option<CheckoutDraft>,
    abandoned: bool,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Aggregate for DesignSession {
    type Event = SessionEvent;
    type Error = SessionError;

    fn aggregate_type() -> &'static str {
        "DesignSession"
    }

    fn id(&self) -> Option<AggregateId> {
        self.id
    }

    fn version(&self) -> Version {
        self.version
    }

    fn set_version(&mut self, version: Version) {
        self.version = version;
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            SessionEvent::SessionCreated(data) => self.apply_session_created(data),
            SessionEvent::GenerationStarted(data) => {
                self.job_handle = Some(data.job_handle);
                self.updated_at = Some(data.started_at);
            }
            SessionEvent::StageAdvanced(data) => {
                self.stage = data.to;
                self.progress = data.progress;
                self.message = data.message;
                self.updated_at = Some(data.advanced_at);
            }
            SessionEvent::ProgressReported(data) => {
                self.progress = data.progress;
                self.message = data.message;
                self.updated_at = Some(data.reported_at);
            }
            SessionEvent::AssetRecorded(AssetRecordedData { asset }) => {
                if self.selected_asset_id.is_none() {
                    self.selected_asset_id = Some(asset.id.clone());
                }
                self.updated_at = Some(asset.created_at);
                self.assets.push(asset);
            }
            SessionEvent::AssetSelected(AssetSelectedData { asset_id }) => {
                self.selected_asset_id = Some(asset_id);
            }
            SessionEvent::GenerationFailed(data) => {
                self.stage = Stage::Failed;
                self.message = data.message.clone();
                self.error = Some(FailureInfo::new(data.reason, data.message));
                self.updated_at = Some(data.failed_at);
            }
            SessionEvent::SessionRequeued(data) => self.apply_session_requeued(data),
            SessionEvent::OwnerAssigned(OwnerAssignedData { owner }) => {
                self.owner = Some(owner);
            }
            SessionEvent::ProductSelected(ProductSelectedData { selection }) => {
                self.product = Some(selection);
            }
            SessionEvent::SessionAbandoned(SessionAbandonedData { abandoned_at }) => {
                self.abandoned = true;
                self.updated_at = Some(abandoned_at);
            }
            SessionEvent::ConsentRecorded(data) => self.apply_consent_recorded(data),
            SessionEvent::CheckoutInitiated(CheckoutInitiatedData {
                checkout,
                initiated_at,
            }) => {
                self.checkout = Some(checkout);
                self.updated_at = Some(initiated_at);
            }
            SessionEvent::ApprovalConsumed(ApprovalConsumedData {
                order_id,
                consumed_at,
                ..
            }) => {
                self.consumed_by_order = Some(order_id);
                self.updated_at = Some(consumed_at);
            }
        }
    }
}

// Query methods
impl DesignSession {
    pub fn owner(&self) -> Option<&OwnerId> {
        self.owner.as_ref()
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn style_hints(&self) -> &StyleHints {
        &self.style_hints
    }

    pub fn locale(&self) -> &str {
        &self.locale
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn progress(&self) -> u8 {
        self.progress
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn error(&self) -> Option<&FailureInfo> {
        self.error.as_ref()
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn job_handle(&self) -> Option<&str> {
        self.job_handle.as_deref()
    }

    pub fn assets(&self) -> &[DesignAsset] {
        &self.assets
    }

    pub fn selected_asset_id(&self) -> Option<&AssetId> {
        self.selected_asset_id.as_ref()
    }

    pub fn selected_asset(&self) -> Option<&DesignAsset> {
        let selected = self.selected_asset_id.as_ref()?;
        self.assets.iter().find(|a| &a.id == selected)
    }

    pub fn product(&self) -> Option<&ProductSelection> {
        self.product.as_ref()
    }

    pub fn consent_accepted(&self) -> bool {
        self.consent_accepted
    }

    pub fn consent_accepted_at(&self) -> Option<DateTime<Utc>> {
        self.consent_accepted_at
    }

    pub fn approval_nonce(&self) -> Option<&str> {
        self.approval_nonce.as_deref()
    }

    /// The order created from this session's approval, if any.
    pub fn consumed_by_order(&self) -> Option<AggregateId> {
        self.consumed_by_order
    }

    pub fn checkout(&self) -> Option<&CheckoutDraft> {
        self.checkout.as_ref()
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }
}

// Command methods (return events)
impl DesignSession {
    /// Opens a new session in the `Queued` stage.
    pub fn create(
        &self,
        session_id: AggregateId,
        owner: Option<OwnerId>,
        prompt: impl Into<String>,
        style_hints: StyleHints,
        locale: impl Into<String>,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        if self.id.is_some() {
            return Err(SessionError::AlreadyCreated);
        }

        let prompt = prompt.into().trim().to_string();
        if prompt.is_empty() {
            return Err(SessionError::EmptyPrompt);
        }

        Ok(vec![SessionEvent::SessionCreated(SessionCreatedData {
            session_id,
            owner,
            prompt,
            style_hints,
            locale: locale.into(),
            created_at: Utc::now(),
        })])
    }

    /// Records the provider job and moves `Queued → GeneratingBrief`.
    pub fn start_generation(
        &self,
        job_handle: impl Into<String>,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        self.ensure_stage(Stage::Queued)?;

        let to = Stage::GeneratingBrief;
        Ok(vec![
            SessionEvent::GenerationStarted(GenerationStartedData {
                job_handle: job_handle.into(),
                started_at: Utc::now(),
            }),
            SessionEvent::stage_advanced(Stage::Queued, to, to.baseline(), "Writing the design brief"),
        ])
    }

    /// Moves `from → to`, where `to` must be the stage right after `from`
    /// and `from` the current stage.
    ///
    /// Progress never drops: it is raised to the current progress and to
    /// the target stage's baseline.
    pub fn advance(
        &self,
        from: Stage,
        to: Stage,
        progress: u8,
        message: impl Into<String>,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        self.ensure_stage(from)?;
        if from.next() != Some(to) {
            return Err(SessionError::InvalidTransition { from, to });
        }

        let progress = progress.max(self.progress).max(to.baseline()).min(100);
        Ok(vec![SessionEvent::stage_advanced(from, to, progress, message)])
    }

    /// Reports progress within the current stage. A report that does not
    /// raise progress is a no-op.
    pub fn report_progress(
        &self,
        stage: Stage,
        progress: u8,
        message: impl Into<String>,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        self.ensure_stage(stage)?;
        if stage.is_terminal() {
            return Err(SessionError::Terminal { stage });
        }

        let progress = progress.min(100);
        if progress <= self.progress {
            return Ok(vec![]);
        }

        Ok(vec![SessionEvent::progress_reported(stage, progress, message)])
    }

    /// Appends a finished asset. The first asset becomes the selection.
    pub fn record_asset(&self, asset: DesignAsset) -> Result<Vec<SessionEvent>, SessionError> {
        if self.assets.iter().any(|a| a.id == asset.id) {
            return Err(SessionError::DuplicateAsset {
                asset_id: asset.id.to_string(),
            });
        }

        Ok(vec![SessionEvent::AssetRecorded(AssetRecordedData {
            asset,
        })])
    }

    pub fn select_asset(&self, asset_id: AssetId) -> Result<Vec<SessionEvent>, SessionError> {
        if !self.assets.iter().any(|a| a.id == asset_id) {
            return Err(SessionError::AssetNotFound {
                asset_id: asset_id.to_string(),
            });
        }
        if self.selected_asset_id.as_ref() == Some(&asset_id) {
            return Ok(vec![]);
        }

        Ok(vec![SessionEvent::AssetSelected(AssetSelectedData {
            asset_id,
        })])
    }

    /// Fails the session from `stage`, which must be current and
    /// non-terminal.
    pub fn fail(
        &self,
        stage: Stage,
        reason: ReasonCode,
        message: impl Into<String>,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        if self.stage.is_terminal() {
            return Err(SessionError::Terminal { stage: self.stage });
        }
        self.ensure_stage(stage)?;

        Ok(vec![SessionEvent::generation_failed(stage, reason, message)])
    }

    /// Sends a failed session back to `Queued` with progress reset.
    pub fn requeue(&self, max_retries: u32) -> Result<Vec<SessionEvent>, SessionError> {
        if self.stage != Stage::Failed {
            return Err(SessionError::NotFailed { stage: self.stage });
        }
        if self.retry_count >= max_retries {
            return Err(SessionError::RetryLimitExceeded { max_retries });
        }

        Ok(vec![SessionEvent::SessionRequeued(SessionRequeuedData {
            retry_count: self.retry_count + 1,
            requeued_at: Utc::now(),
        })])
    }

    /// Attaches the signed-in user. Reassigning the same owner is a no-op.
    pub fn assign_owner(&self, owner: OwnerId) -> Result<Vec<SessionEvent>, SessionError> {
        match &self.owner {
            Some(current) if *current == owner => Ok(vec![]),
            Some(_) => Err(SessionError::OwnerMismatch),
            None => Ok(vec![SessionEvent::OwnerAssigned(OwnerAssignedData {
                owner,
            })]),
        }
    }

    pub fn select_product(
        &self,
        selection: ProductSelection,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        self.ensure_open()?;
        if self.product.as_ref() == Some(&selection) {
            return Ok(vec![]);
        }

        Ok(vec![SessionEvent::ProductSelected(ProductSelectedData {
            selection,
        })])
    }

    /// Marks the session abandoned. Background generation continues; only
    /// customer-driven actions are blocked afterwards.
    pub fn abandon(&self) -> Result<Vec<SessionEvent>, SessionError> {
        if self.abandoned {
            return Ok(vec![]);
        }

        Ok(vec![SessionEvent::SessionAbandoned(SessionAbandonedData {
            abandoned_at: Utc::now(),
        })])
    }

    /// Records print approval with a fresh nonce.
    pub fn record_consent(
        &self,
        consent: bool,
        nonce: impl Into<String>,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        if self.stage != Stage::Ready {
            return Err(SessionError::NotReady { stage: self.stage });
        }
        if !consent {
            return Err(SessionError::ConsentRequired);
        }
        self.ensure_open()?;

        Ok(vec![SessionEvent::ConsentRecorded(ConsentRecordedData {
            nonce: nonce.into(),
            accepted_at: Utc::now(),
        })])
    }

    /// Attaches a priced checkout. The nonce must be the current approval
    /// nonce; a newer checkout replaces an older one.
    pub fn initiate_checkout(
        &self,
        checkout: CheckoutDraft,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        self.ensure_open()?;
        self.ensure_nonce(&checkout.approval_nonce)?;

        Ok(vec![SessionEvent::CheckoutInitiated(
            CheckoutInitiatedData {
                checkout,
                initiated_at: Utc::now(),
            },
        )])
    }

    /// Consumes the approval for `order_id`. Consuming again for the same
    /// order is a no-op; any other order is rejected.
    pub fn consume_approval(
        &self,
        nonce: &str,
        order_id: AggregateId,
    ) -> Result<Vec<SessionEvent>, SessionError> {
        match self.consumed_by_order {
            Some(existing) if existing == order_id => return Ok(vec![]),
            Some(_) => return Err(SessionError::ApprovalAlreadyConsumed),
            None => {}
        }
        self.ensure_nonce(nonce)?;

        Ok(vec![SessionEvent::ApprovalConsumed(ApprovalConsumedData {
            nonce: nonce.to_string(),
            order_id,
            consumed_at: Utc::now(),
        })])
    }

    fn ensure_stage(&self, expected: Stage) -> Result<(), SessionError> {
        if self.stage != expected {
            return Err(SessionError::StageMismatch {
                expected,
                actual: self.stage,
            });
        }
        Ok(())
    }

    /// Customer actions are refused once abandoned or ordered.
    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.abandoned {
            return Err(SessionError::Abandoned);
        }
        if self.consumed_by_order.is_some() {
            return Err(SessionError::ApprovalAlreadyConsumed);
        }
        Ok(())
    }

    fn ensure_nonce(&self, nonce: &str) -> Result<(), SessionError> {
        if !self.consent_accepted {
            return Err(SessionError::ConsentRequired);
        }
        if self.approval_nonce.as_deref() != Some(nonce) {
            return Err(SessionError::InvalidApproval);
        }
        Ok(())
    }
}

// Apply event helpers
impl DesignSession {
    fn apply_session_created(&mut self, data: SessionCreatedData) {
        self.id = Some(data.session_id);
        self.owner = data.owner;
        self.prompt = data.prompt;
        self.style_hints = data.style_hints;
        self.locale = data.locale;
        self.stage = Stage::Queued;
        self.progress = 0;
        self.message = "Waiting to start".to_string();
        self.created_at = Some(data.created_at);
        self.updated_at = Some(data.created_at);
    }

    fn apply_session_requeued(&mut self, data: SessionRequeuedData) {
        self.stage = Stage::Queued;
        self.progress = 0;
        self.message = "Waiting to retry".to_string();
        self.error = None;
        self.job_handle = None;
        self.retry_count = data.retry_count;
        self.updated_at = Some(data.requeued_at);
    }

    fn apply_consent_recorded(&mut self, data: ConsentRecordedData) {
        self.consent_accepted = true;
        self.consent_accepted_at = Some(data.accepted_at);
        self.approval_nonce = Some(data.nonce);
        // A checkout priced under the previous nonce is no longer valid.
        self.checkout = None;
        self.updated_at = Some(data.accepted_at);
    }
}
