//! Pipeline tuning knobs.

use std::time::Duration;

use crate::retry::BackoffConfig;

/// Tuning for the generation worker, the coordinator and the
/// reconciliation engine.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Provider attempts per generation stage before the session fails.
    pub max_stage_attempts: u32,

    /// Delay schedule between those attempts.
    pub backoff: BackoffConfig,

    /// How many times one session may be requeued after failing.
    pub max_session_retries: u32,

    /// Upper bound on any single provider call.
    pub provider_timeout: Duration,

    /// Delay between `advance` calls while a worker runs a session.
    pub poll_interval: Duration,

    /// How often the reconciliation engine scans orders.
    pub scan_interval: Duration,

    /// Age an unsubmitted paid order must reach before the scanner touches
    /// it, so it does not race the webhook-triggered submission.
    pub grace_period: Duration,

    /// How long a submitted order may go without tracking before it is
    /// flagged for review.
    pub tracking_sla: Duration,

    /// Failed submission attempts before an order is dead-lettered.
    pub max_submission_attempts: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_stage_attempts: 3,
            backoff: BackoffConfig::default(),
            max_session_retries: 3,
            provider_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(500),
            scan_interval: Duration::from_secs(5),
            grace_period: Duration::from_secs(30),
            tracking_sla: Duration::from_secs(48 * 3600),
            max_submission_attempts: 5,
        }
    }
}

impl PipelineConfig {
    /// Config with every delay shrunk to a few milliseconds.
    pub fn fast() -> Self {
        Self {
            backoff: BackoffConfig {
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
            },
            provider_timeout: Duration::from_millis(200),
            poll_interval: Duration::from_millis(1),
            scan_interval: Duration::from_millis(10),
            ..Self::default()
        }
    }
}
