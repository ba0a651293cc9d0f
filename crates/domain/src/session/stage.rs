//! Generation stages of a design session.

use serde::{Deserialize, Serialize};

/// Where a design session is in the generation pipeline.
///
/// ```text
/// Queued ─► GeneratingBrief ─► GeneratingImages ─► Compositing ─► PreparingPrint
///    ▲          ─► GeneratingMockups ─► Uploading ─► Ready
///    │
///    └── requeue ── Failed ◄── any non-terminal stage
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Queued,
    GeneratingBrief,
    GeneratingImages,
    Compositing,
    PreparingPrint,
    GeneratingMockups,
    Uploading,
    Ready,
    Failed,
}

impl Stage {
    /// The forward path, in order.
    pub const PIPELINE: [Stage; 8] = [
        Stage::Queued,
        Stage::GeneratingBrief,
        Stage::GeneratingImages,
        Stage::Compositing,
        Stage::PreparingPrint,
        Stage::GeneratingMockups,
        Stage::Uploading,
        Stage::Ready,
    ];

    /// Position on the forward path. `Failed` ranks above every stage so
    /// that a failure is never treated as older than the stage it ended.
    pub fn rank(&self) -> u8 {
        match self {
            Stage::Queued => 0,
            Stage::GeneratingBrief => 1,
            Stage::GeneratingImages => 2,
            Stage::Compositing => 3,
            Stage::PreparingPrint => 4,
            Stage::GeneratingMockups => 5,
            Stage::Uploading => 6,
            Stage::Ready => 7,
            Stage::Failed => 8,
        }
    }

    /// The only stage this one may advance to.
    pub fn next(&self) -> Option<Stage> {
        match self {
            Stage::Ready | Stage::Failed => None,
            other => Stage::PIPELINE.get(usize::from(other.rank()) + 1).copied(),
        }
    }

    /// Minimum progress percentage once this stage is reached.
    pub fn baseline(&self) -> u8 {
        match self {
            Stage::Queued => 0,
            Stage::GeneratingBrief => 10,
            Stage::GeneratingImages => 25,
            Stage::Compositing => 45,
            Stage::PreparingPrint => 60,
            Stage::GeneratingMockups => 75,
            Stage::Uploading => 90,
            Stage::Ready => 100,
            Stage::Failed => 0,
        }
    }

    /// Returns true if generation has finished, successfully or not.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Ready | Stage::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Queued => "queued",
            Stage::GeneratingBrief => "generating_brief",
            Stage::GeneratingImages => "generating_images",
            Stage::Compositing => "compositing",
            Stage::PreparingPrint => "preparing_print",
            Stage::GeneratingMockups => "generating_mockups",
            Stage::Uploading => "uploading",
            Stage::Ready => "ready",
            Stage::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
