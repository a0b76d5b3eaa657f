//! Guardian Pipeline Module
//!
//! Connects an editor hook to the analysis stages:
//!
//! 1. **Event**: route hook events to a monitored model file and its module
//! 2. **Policy**: decide whether a migration may be generated
//! 3. **Orchestrator**: run detection, analysis and generation in order
//! 4. **Report**: console output and the persisted run history

pub mod event;
pub mod orchestrator;
pub mod policy;
pub mod report;

// Re-export main types for convenient access
pub use event::{EventRouter, HookEvent, Skip, Target};
pub use orchestrator::{Guardian, RunOutcome};
pub use policy::{Confirmer, Decision, GenerationPolicy, ScriptedConfirmer, TerminalConfirmer};
pub use report::ReportWriter;
