//! Step sequencing with central continuation decisions.
//!
//! A [`Pipeline`] holds named steps, each with a criticality. Every step runs
//! at most once. A fatal step that errors halts the run; a recoverable one is
//! downgraded to `Warned` and the run continues.

use anyhow::Result;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Fatal,
    Recoverable,
}

/// What a successful action reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Satisfied(String),
    /// Completed in a degraded way the operator should look at.
    Warned(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    NotStarted,
    Running,
    Satisfied,
    Warned,
    Failed,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepState::NotStarted => "not started",
            StepState::Running => "running",
            StepState::Satisfied => "ok",
            StepState::Warned => "warned",
            StepState::Failed => "failed",
        };
        f.write_str(s)
    }
}

type Action<'a, C> = Box<dyn FnMut(&mut C) -> Result<StepOutcome> + 'a>;

struct Step<'a, C> {
    name: String,
    criticality: Criticality,
    state: StepState,
    action: Action<'a, C>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub name: String,
    pub criticality: Criticality,
    pub state: StepState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip)]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed,
    Aborted { step: String },
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed => f.write_str("completed"),
            RunOutcome::Aborted { step } => write!(f, "aborted at {}", step),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn warned(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| s.state == StepState::Warned)
    }

    pub fn state_of(&self, name: &str) -> Option<StepState> {
        self.steps.iter().find(|s| s.name == name).map(|s| s.state)
    }
}

pub struct Pipeline<'a, C> {
    steps: Vec<Step<'a, C>>,
}

impl<'a, C> Default for Pipeline<'a, C> {
    fn default() -> Self {
        Self { steps: Vec::new() }
    }
}

impl<'a, C> Pipeline<'a, C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fatal<F>(&mut self, name: impl Into<String>, action: F) -> &mut Self
    where
        F: FnMut(&mut C) -> Result<StepOutcome> + 'a,
    {
        self.push(name.into(), Criticality::Fatal, Box::new(action))
    }

    pub fn recoverable<F>(&mut self, name: impl Into<String>, action: F) -> &mut Self
    where
        F: FnMut(&mut C) -> Result<StepOutcome> + 'a,
    {
        self.push(name.into(), Criticality::Recoverable, Box::new(action))
    }

    fn push(&mut self, name: String, criticality: Criticality, action: Action<'a, C>) -> &mut Self {
        self.steps.push(Step {
            name,
            criticality,
            state: StepState::NotStarted,
            action,
        });
        self
    }

    /// Run every step in order against `ctx`. Consumes the pipeline so no
    /// step can run twice.
    pub fn run(mut self, ctx: &mut C) -> RunReport {
        let mut reports = Vec::with_capacity(self.steps.len());
        let mut aborted_at = None;

        for step in self.steps.iter_mut() {
            if aborted_at.is_some() {
                reports.push(StepReport {
                    name: step.name.clone(),
                    criticality: step.criticality,
                    state: step.state,
                    detail: None,
                    elapsed: Duration::ZERO,
                });
                continue;
            }

            step.state = StepState::Running;
            info!(step = %step.name, "running");
            let started = Instant::now();
            let result = (step.action)(ctx);
            let elapsed = started.elapsed();

            let (state, detail) = match (result, step.criticality) {
                (Ok(StepOutcome::Satisfied(detail)), _) => {
                    info!(step = %step.name, %detail, "satisfied");
                    (StepState::Satisfied, detail)
                }
                (Ok(StepOutcome::Warned(detail)), _) => {
                    warn!(step = %step.name, %detail, "completed with warning");
                    (StepState::Warned, detail)
                }
                (Err(e), Criticality::Recoverable) => {
                    warn!(step = %step.name, error = %format!("{:#}", e), "failed, continuing");
                    (StepState::Warned, format!("{:#}", e))
                }
                (Err(e), Criticality::Fatal) => {
                    error!(step = %step.name, error = %format!("{:#}", e), "failed, halting");
                    aborted_at = Some(step.name.clone());
                    (StepState::Failed, format!("{:#}", e))
                }
            };
            step.state = state;
            reports.push(StepReport {
                name: step.name.clone(),
                criticality: step.criticality,
                state,
                detail: Some(detail),
                elapsed,
            });
        }

        let outcome = match aborted_at {
            Some(step) => RunOutcome::Aborted { step },
            None => RunOutcome::Completed,
        };
        RunReport {
            outcome,
            steps: reports,
        }
    }
}
