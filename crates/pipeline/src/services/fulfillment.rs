//! Print fulfillment provider trait and in-memory implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use domain::{FulfillmentStatus, OrderItem, ReasonCode, ShippingAddress};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// What the print partner reports about one of its orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOrderStatus {
    pub status: FulfillmentStatus,
    pub tracking_code: Option<String>,
    pub tracking_url: Option<String>,
}

/// The print-on-demand partner.
#[async_trait]
pub trait FulfillmentProvider: Send + Sync {
    /// Places an order and returns the provider's reference. Repeating a
    /// call with the same key must not create a second order.
    async fn submit_order(
        &self,
        idempotency_key: &str,
        items: &[OrderItem],
        address: &ShippingAddress,
    ) -> Result<String, ProviderError>;

    /// Looks up an order by the key it was submitted with.
    async fn find_order(&self, idempotency_key: &str) -> Result<Option<String>, ProviderError>;

    async fn get_order_status(&self, provider_ref: &str)
    -> Result<ProviderOrderStatus, ProviderError>;
}

#[derive(Debug)]
struct ProviderOrder {
    status: ProviderOrderStatus,
}

#[derive(Debug, Default)]
struct InMemoryFulfillmentState {
    refs_by_key: HashMap<String, String>,
    orders: HashMap<String, ProviderOrder>,
    submit_failures: VecDeque<ProviderError>,
    commit_then_timeout: u32,
    find_failures: VecDeque<ProviderError>,
    submit_calls: u32,
    find_calls: u32,
    status_calls: u32,
}

/// In-memory print partner.
///
/// Submissions are deduplicated by idempotency key. Besides plain queued
/// failures it can simulate a call that commits on the partner's side but
/// times out for the caller.
#[derive(Debug, Clone, Default)]
pub struct InMemoryFulfillmentProvider {
    state: Arc<Mutex<InMemoryFulfillmentState>>,
}

impl InMemoryFulfillmentProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, InMemoryFulfillmentState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Fails the next submissions with these errors. Nothing is committed.
    pub fn fail_next_submits(&self, errors: impl IntoIterator<Item = ProviderError>) {
        self.state().submit_failures.extend(errors);
    }

    /// The next `count` submissions create the order but report a timeout.
    pub fn commit_then_timeout(&self, count: u32) {
        self.state().commit_then_timeout += count;
    }

    /// Rejects the next submission as invalid.
    pub fn reject_next(&self, reason: ReasonCode, message: impl Into<String>) {
        self.fail_next_submits([ProviderError::Rejected {
            reason,
            message: message.into(),
        }]);
    }

    /// Fails the next read-back lookups with these errors.
    pub fn fail_find(&self, errors: impl IntoIterator<Item = ProviderError>) {
        self.state().find_failures.extend(errors);
    }

    /// Moves a provider order to a new status.
    pub fn set_status(
        &self,
        provider_ref: &str,
        status: FulfillmentStatus,
        tracking_code: Option<&str>,
    ) {
        if let Some(order) = self.state().orders.get_mut(provider_ref) {
            order.status = ProviderOrderStatus {
                status,
                tracking_url: tracking_code.map(|t| format!("https://track.example/{t}")),
                tracking_code: tracking_code.map(str::to_string),
            };
        }
    }

    /// The reference stored for a key, bypassing failure injection.
    pub fn reference_for(&self, idempotency_key: &str) -> Option<String> {
        self.state().refs_by_key.get(idempotency_key).cloned()
    }

    pub fn submit_calls(&self) -> u32 {
        self.state().submit_calls
    }

    pub fn find_calls(&self) -> u32 {
        self.state().find_calls
    }

    pub fn status_calls(&self) -> u32 {
        self.state().status_calls
    }

    /// Distinct orders the partner holds.
    pub fn order_count(&self) -> usize {
        self.state().orders.len()
    }
}

#[async_trait]
impl FulfillmentProvider for InMemoryFulfillmentProvider {
    async fn submit_order(
        &self,
        idempotency_key: &str,
        items: &[OrderItem],
        address: &ShippingAddress,
    ) -> Result<String, ProviderError> {
        let mut state = self.state();
        state.submit_calls += 1;

        if let Some(err) = state.submit_failures.pop_front() {
            return Err(err);
        }
        if items.is_empty() {
            return Err(ProviderError::Rejected {
                reason: ReasonCode::ProviderRejected,
                message: "order has no items".to_string(),
            });
        }
        if address.validate().is_err() {
            return Err(ProviderError::Rejected {
                reason: ReasonCode::InvalidAddress,
                message: "address failed validation".to_string(),
            });
        }

        let provider_ref = match state.refs_by_key.get(idempotency_key) {
            Some(existing) => existing.clone(),
            None => {
                let provider_ref = format!("po_{:06}", state.orders.len() + 1);
                state
                    .refs_by_key
                    .insert(idempotency_key.to_string(), provider_ref.clone());
                state.orders.insert(
                    provider_ref.clone(),
                    ProviderOrder {
                        status: ProviderOrderStatus {
                            status: FulfillmentStatus::Submitted,
                            tracking_code: None,
                            tracking_url: None,
                        },
                    },
                );
                provider_ref
            }
        };

        if state.commit_then_timeout > 0 {
            state.commit_then_timeout -= 1;
            return Err(ProviderError::Timeout(Duration::from_secs(10)));
        }
        Ok(provider_ref)
    }

    async fn find_order(&self, idempotency_key: &str) -> Result<Option<String>, ProviderError> {
        let mut state = self.state();
        state.find_calls += 1;

        if let Some(err) = state.find_failures.pop_front() {
            return Err(err);
        }
        Ok(state.refs_by_key.get(idempotency_key).cloned())
    }

    async fn get_order_status(
        &self,
        provider_ref: &str,
    ) -> Result<ProviderOrderStatus, ProviderError> {
        let mut state = self.state();
        state.status_calls += 1;
        state
            .orders
            .get(provider_ref)
            .map(|o| o.status.clone())
            .ok_or_else(|| ProviderError::NotFound(provider_ref.to_string()))
    }
}
