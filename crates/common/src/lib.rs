//! ARTK Common Library
//!
//! The pure core of the Journey compiler: Journey parsing, the step matcher cascade,
//! locator resolution, the instruction IR, Playwright code generation with managed-block
//! merging, and the persisted pipeline state machine. Nothing in this crate spawns a
//! process; execution and healing live in `artk-e2e`.

pub mod blocks;
pub mod codegen;
pub mod config;
pub mod error;
pub mod fsutil;
pub mod ir;
pub mod journey;
pub mod locator;
pub mod matcher;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use blocks::{extract_blocks, inject_blocks, ManagedBlock, MergeReport, MergeResult};
pub use codegen::{CodeGenerator, GeneratedTest, SourceMap};
pub use config::ArtkConfig;
pub use error::{Error, Result};
pub use ir::{Instruction, IrJourney, IrStep, LocatorSpec, LocatorStrategy, ValueSpec};
pub use journey::{build_ir, load_journey, parse_journey, validate_journey, Journey};
pub use locator::LocatorResolver;
pub use matcher::{CascadingMatcher, MatchContext, MatchOutcome, MatchTier};
pub use state::{PipelineState, Stage, StateStore};

/// ARTK version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
