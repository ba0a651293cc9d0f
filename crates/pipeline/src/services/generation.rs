//! Generation service trait and in-memory implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use domain::Stage;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Handle of a generation job at the provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub String);

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A request to start generating a design.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Repeating a request with the same key returns the same job.
    pub idempotency_key: String,
    pub prompt: String,
    pub style_hints: Vec<String>,
}

/// A finished artifact as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedAsset {
    pub id: String,
    pub preview_url: String,
    pub mockup_urls: Vec<String>,
    pub notes: Option<String>,
}

/// Final result of a generation job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationResult {
    Completed(Vec<GeneratedAsset>),
}

/// What the provider reports when polled.
#[derive(Debug, Clone)]
pub struct GenerationUpdate {
    /// The stage the provider is working on, or `Ready` once done.
    pub stage: Stage,
    pub progress: u8,
    pub message: String,
    /// Present once the job has finished.
    pub result: Option<GenerationResult>,
}

/// The generative design service.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn start_generation(
        &self,
        request: GenerationRequest,
    ) -> Result<JobHandle, ProviderError>;

    async fn poll(&self, job: &JobHandle) -> Result<GenerationUpdate, ProviderError>;
}

#[derive(Debug)]
struct Job {
    polls: u32,
}

#[derive(Debug, Default)]
struct InMemoryGenerationState {
    jobs_by_key: HashMap<String, JobHandle>,
    jobs: HashMap<JobHandle, Job>,
    polls_per_stage: u32,
    start_failures: VecDeque<ProviderError>,
    poll_failures: VecDeque<ProviderError>,
    blocked_words: Vec<String>,
    start_calls: u32,
    poll_calls: u32,
}

/// In-memory generation service.
///
/// Each job moves one stage forward every `polls_per_stage` polls and
/// completes with a single asset. Failures can be queued for the next
/// calls to exercise retry paths.
#[derive(Debug, Clone)]
pub struct InMemoryGenerationService {
    state: Arc<Mutex<InMemoryGenerationState>>,
}

impl Default for InMemoryGenerationService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGenerationService {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(InMemoryGenerationState {
                polls_per_stage: 1,
                ..Default::default()
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, InMemoryGenerationState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Polls needed before a job leaves a stage. Values above one make the
    /// job report intermediate progress.
    pub fn set_polls_per_stage(&self, polls: u32) {
        self.state().polls_per_stage = polls.max(1);
    }

    /// Fails the next `start_generation` calls with these errors, in order.
    pub fn fail_next_starts(&self, errors: impl IntoIterator<Item = ProviderError>) {
        self.state().start_failures.extend(errors);
    }

    /// Fails the next `poll` calls with these errors, in order.
    pub fn fail_next_polls(&self, errors: impl IntoIterator<Item = ProviderError>) {
        self.state().poll_failures.extend(errors);
    }

    /// Rejects prompts containing `word` under the content policy.
    pub fn block_word(&self, word: impl Into<String>) {
        self.state().blocked_words.push(word.into().to_lowercase());
    }

    pub fn start_calls(&self) -> u32 {
        self.state().start_calls
    }

    pub fn poll_calls(&self) -> u32 {
        self.state().poll_calls
    }

    pub fn job_count(&self) -> usize {
        self.state().jobs.len()
    }
}

#[async_trait]
impl GenerationService for InMemoryGenerationService {
    async fn start_generation(
        &self,
        request: GenerationRequest,
    ) -> Result<JobHandle, ProviderError> {
        let mut state = self.state();
        state.start_calls += 1;

        if let Some(err) = state.start_failures.pop_front() {
            return Err(err);
        }
        let prompt = request.prompt.to_lowercase();
        if state.blocked_words.iter().any(|w| prompt.contains(w.as_str())) {
            return Err(ProviderError::ContentPolicy(format!(
                "prompt rejected: {}",
                request.prompt
            )));
        }

        if let Some(job) = state.jobs_by_key.get(&request.idempotency_key) {
            return Ok(job.clone());
        }

        let job = JobHandle(format!("job-{}", state.jobs.len() + 1));
        state
            .jobs_by_key
            .insert(request.idempotency_key, job.clone());
        state.jobs.insert(job.clone(), Job { polls: 0 });
        Ok(job)
    }

    async fn poll(&self, job: &JobHandle) -> Result<GenerationUpdate, ProviderError> {
        let mut state = self.state();
        state.poll_calls += 1;

        if let Some(err) = state.poll_failures.pop_front() {
            return Err(err);
        }

        let per_stage = state.polls_per_stage;
        let entry = state
            .jobs
            .get_mut(job)
            .ok_or_else(|| ProviderError::NotFound(job.to_string()))?;
        entry.polls += 1;

        let last = Stage::PIPELINE.len() - 1;
        let index = (1 + (entry.polls / per_stage) as usize).min(last);
        let stage = Stage::PIPELINE[index];

        if stage == Stage::Ready {
            let asset_id = format!("{job}-asset-1");
            return Ok(GenerationUpdate {
                stage,
                progress: 100,
                message: "Design ready".to_string(),
                result: Some(GenerationResult::Completed(vec![GeneratedAsset {
                    preview_url: format!("https://cdn.example/{asset_id}/preview.png"),
                    mockup_urls: vec![
                        format!("https://cdn.example/{asset_id}/tee.png"),
                        format!("https://cdn.example/{asset_id}/mug.png"),
                    ],
                    notes: Some("print-ready at 300 dpi".to_string()),
                    id: asset_id,
                }])),
            });
        }

        let within = (entry.polls % per_stage) as u8;
        Ok(GenerationUpdate {
            stage,
            progress: stage.baseline().saturating_add(within * 2),
            message: format!("Working on {stage}"),
            result: None,
        })
    }
}
