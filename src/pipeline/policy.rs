//! Generation policy
//!
//! Decides whether a migration may be generated for a safety report. LOW
//! risk proceeds on its own, HIGH risk can be refused outright, everything
//! else goes through a `Confirmer` when review is required.

use super::report::format_alert;
use crate::config::GuardianConfig;
use crate::models::{RiskLevel, SafetyReport};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::io::{self, BufRead, BufReader, Write};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Proceed,
    Blocked,
    Declined,
}

/// Source of an explicit yes/no answer
pub trait Confirmer: Send + Sync {
    fn confirm(&self, prompt: &str) -> bool;
}

/// Prompts on the controlling terminal
///
/// Hook input arrives on stdin, so the answer is read from `/dev/tty` when
/// one exists. Without a terminal the prompt falls back to stdin, where an
/// exhausted stream reads as "no".
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalConfirmer;

impl Confirmer for TerminalConfirmer {
    fn confirm(&self, prompt: &str) -> bool {
        eprint!("{}", prompt);
        if let Err(e) = io::stderr().flush() {
            warn!("⚠️  Could not flush prompt: {}", e);
        }

        let mut answer = String::new();
        let read = match std::fs::File::open("/dev/tty") {
            Ok(tty) => BufReader::new(tty).read_line(&mut answer),
            Err(_) => io::stdin().lock().read_line(&mut answer),
        };
        match read {
            Ok(_) => is_yes(&answer),
            Err(e) => {
                warn!("⚠️  Could not read confirmation: {}", e);
                false
            }
        }
    }
}

/// Replays canned answers, then answers "no"
#[derive(Debug, Default)]
pub struct ScriptedConfirmer {
    answers: Mutex<VecDeque<bool>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedConfirmer {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts shown so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| p.clone())
            .unwrap_or_default()
    }
}

impl Confirmer for ScriptedConfirmer {
    fn confirm(&self, prompt: &str) -> bool {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        self.answers
            .lock()
            .ok()
            .and_then(|mut answers| answers.pop_front())
            .unwrap_or(false)
    }
}

impl<C: Confirmer + ?Sized> Confirmer for Arc<C> {
    fn confirm(&self, prompt: &str) -> bool {
        (**self).confirm(prompt)
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
}

pub const CONFIRM_PROMPT: &str = "\n⚠️  Proceed with migration generation? [y/N]: ";

pub struct GenerationPolicy {
    auto_generate: bool,
    require_review: bool,
    block_dangerous: bool,
    confirmer: Box<dyn Confirmer>,
}

impl GenerationPolicy {
    pub fn new(config: &GuardianConfig, confirmer: Box<dyn Confirmer>) -> Self {
        Self {
            auto_generate: config.auto_generate,
            require_review: config.require_review,
            block_dangerous: config.block_dangerous,
            confirmer,
        }
    }

    pub fn should_generate(&self, report: &SafetyReport) -> Decision {
        if report.risk_level == RiskLevel::Low && self.auto_generate {
            return Decision::Proceed;
        }

        if report.risk_level == RiskLevel::High && self.block_dangerous {
            eprintln!("\n🚨 DANGEROUS OPERATION BLOCKED!");
            eprintln!("Set 'block_dangerous': false in config to allow");
            warn!("🚨 High-risk migration blocked by configuration");
            return Decision::Blocked;
        }

        eprintln!("{}", format_alert(report));

        if !self.require_review {
            return Decision::Proceed;
        }

        if self.confirmer.confirm(CONFIRM_PROMPT) {
            Decision::Proceed
        } else {
            info!("Migration generation declined");
            Decision::Declined
        }
    }
}
