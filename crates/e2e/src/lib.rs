//! ARTK test execution and pipeline orchestration
//!
//! This crate drives the generated Playwright tests:
//! - Runs test files through a configurable external command
//! - Classifies failures from the runner output
//! - Heals failing journeys through a bounded fix loop
//! - Sequences the pipeline commands against the persisted state machine
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Pipeline                             │
//! │    analyze ─▶ plan ─▶ generate ─▶ test ─▶ heal              │
//! │       │        │         │          │       │               │
//! │  journeys    IR json   *.spec.ts    │   HealingEngine       │
//! ├─────────────────────────────────────┼───────┼───────────────┤
//! │  TestExecutor (ProcessRunner)  ◀────┘───────┘               │
//! │    └── RunOutcome ─▶ classify() ─▶ [ClassifiedFailure]      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  StateStore: .artk/pipeline-state.json                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod classifier;
pub mod error;
pub mod healing;
pub mod pipeline;
pub mod runner;

pub use classifier::{classify, ClassifiedFailure, FailureCategory, SourceLocation};
pub use error::{E2eError, E2eResult};
pub use healing::{HealingEngine, HealingLog, HealingOutcome, HealingSession};
pub use pipeline::{GeneratedFile, HealReport, JourneySummary, Pipeline, TestReport};
pub use runner::{ProcessRunner, RunOutcome, RunStatus, TestExecutor};
