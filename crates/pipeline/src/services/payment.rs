//! Payment processor trait and in-memory implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use domain::Money;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, ProviderError};
use crate::signing::Signer;

/// A request to open a payment for a checkout.
#[derive(Debug, Clone)]
pub struct PaymentIntentRequest {
    pub idempotency_key: String,
    pub amount: Money,
    pub currency: String,
    pub metadata: HashMap<String, String>,
}

/// A payment opened at the processor, awaiting the customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentIntent {
    pub payment_ref: String,
    pub client_secret: String,
    pub amount: Money,
    pub currency: String,
}

/// What a payment notification says happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded,
    Failed { reason: String },
    Refunded { refund_ref: String, amount: Money },
}

/// A verified payment notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentWebhook {
    pub payment_ref: String,
    pub outcome: PaymentOutcome,
    /// The approval token attached as metadata when the intent was created.
    #[serde(default)]
    pub approval_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub payment_ref: String,
    pub amount: Money,
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub refund_ref: String,
    pub amount: Money,
}

/// The payment processor.
#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<PaymentIntent, ProviderError>;

    /// Checks a notification's signature and decodes it.
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<PaymentWebhook, ProviderError>;

    async fn refund(&self, request: RefundRequest) -> Result<RefundReceipt, ProviderError>;
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    intents_by_key: HashMap<String, PaymentIntent>,
    metadata: HashMap<String, HashMap<String, String>>,
    refunds_by_key: HashMap<String, RefundReceipt>,
    intent_failures: VecDeque<ProviderError>,
    refund_failures: VecDeque<ProviderError>,
    intent_calls: u32,
    refund_calls: u32,
}

/// In-memory payment processor. Webhooks are signed with HMAC-SHA256 over
/// the raw body.
#[derive(Debug, Clone)]
pub struct InMemoryPaymentProcessor {
    signer: Signer,
    state: Arc<Mutex<InMemoryPaymentState>>,
}

impl InMemoryPaymentProcessor {
    pub fn new(webhook_secret: &[u8]) -> Result<Self, PipelineError> {
        Ok(Self {
            signer: Signer::new(webhook_secret)?,
            state: Arc::new(Mutex::new(InMemoryPaymentState::default())),
        })
    }

    fn state(&self) -> MutexGuard<'_, InMemoryPaymentState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Signs a raw webhook body the way the processor would.
    pub fn sign_webhook(&self, payload: &[u8]) -> String {
        self.signer.sign(payload)
    }

    /// Builds the signed body of a notification for an existing intent,
    /// carrying the approval token from the intent's metadata.
    pub fn webhook_payload(&self, payment_ref: &str, outcome: PaymentOutcome) -> (Vec<u8>, String) {
        let approval_token = self
            .state()
            .metadata
            .get(payment_ref)
            .and_then(|m| m.get("approval_token").cloned());
        let webhook = PaymentWebhook {
            payment_ref: payment_ref.to_string(),
            outcome,
            approval_token,
        };
        let body = serde_json::to_vec(&webhook).unwrap_or_default();
        let signature = self.sign_webhook(&body);
        (body, signature)
    }

    pub fn fail_next_intents(&self, errors: impl IntoIterator<Item = ProviderError>) {
        self.state().intent_failures.extend(errors);
    }

    pub fn fail_next_refunds(&self, errors: impl IntoIterator<Item = ProviderError>) {
        self.state().refund_failures.extend(errors);
    }

    pub fn intent_calls(&self) -> u32 {
        self.state().intent_calls
    }

    pub fn refund_calls(&self) -> u32 {
        self.state().refund_calls
    }

    /// Distinct refunds actually issued.
    pub fn refund_count(&self) -> usize {
        self.state().refunds_by_key.len()
    }
}

#[async_trait]
impl PaymentProcessor for InMemoryPaymentProcessor {
    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> Result<PaymentIntent, ProviderError> {
        let mut state = self.state();
        state.intent_calls += 1;

        if let Some(err) = state.intent_failures.pop_front() {
            return Err(err);
        }
        if let Some(intent) = state.intents_by_key.get(&request.idempotency_key) {
            return Ok(intent.clone());
        }

        let n = state.intents_by_key.len() + 1;
        let intent = PaymentIntent {
            payment_ref: format!("pi_{n:06}"),
            client_secret: format!("pi_{n:06}_secret"),
            amount: request.amount,
            currency: request.currency,
        };
        state
            .metadata
            .insert(intent.payment_ref.clone(), request.metadata);
        state
            .intents_by_key
            .insert(request.idempotency_key, intent.clone());
        Ok(intent)
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature: &str,
    ) -> Result<PaymentWebhook, ProviderError> {
        if !self.signer.verify(payload, signature) {
            return Err(ProviderError::InvalidSignature);
        }
        serde_json::from_slice(payload).map_err(|e| ProviderError::MalformedPayload(e.to_string()))
    }

    async fn refund(&self, request: RefundRequest) -> Result<RefundReceipt, ProviderError> {
        let mut state = self.state();
        state.refund_calls += 1;

        if let Some(err) = state.refund_failures.pop_front() {
            return Err(err);
        }
        if let Some(receipt) = state.refunds_by_key.get(&request.idempotency_key) {
            return Ok(receipt.clone());
        }

        let receipt = RefundReceipt {
            refund_ref: format!("re_{:06}", state.refunds_by_key.len() + 1),
            amount: request.amount,
        };
        state
            .refunds_by_key
            .insert(request.idempotency_key, receipt.clone());
        Ok(receipt)
    }
}
