//! Resumable, checkpointed multi-phase jobs
//!
//! A job is a fixed sequence of named [`Phase`]s run by a [`PhaseRunner`]
//! over a shared [`PhaseContext`]. Progress is checkpointed through the
//! context's [`StateManager`](crate::state::StateManager), so a restarted job
//! skips the phases it already completed.

mod engine_slot;
mod item_loop;
mod recipe;
mod runner;

pub use engine_slot::EngineSlot;
pub use item_loop::{ItemLoop, ItemLoopStats};
pub use recipe::{
    source_recipe, DetailPhase, DiscoverPhase, RecipeOptions, SummaryPhase, ITEMS_OFFSET_KEY,
    LINKS_KEY,
};
pub use runner::{JobOutcome, Phase, PhaseContext, PhaseResult, PhaseRunner};

use crate::fetch::EngineError;
use crate::output::OutputError;
use crate::storage::StateError;
use thiserror::Error;

/// Errors that stop a job outright
#[derive(Debug, Error)]
pub enum JobError {
    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Output error: {0}")]
    Output(#[from] OutputError),

    #[error("Saved phase '{0}' is not part of this job")]
    UnknownPhase(String),

    #[error("Job is running offline; no engine available")]
    Offline,
}
