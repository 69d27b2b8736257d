//! Preflight checks for image assembly.
//!
//! Validates host tools and boot assets before touching any disk.
//! Run with `imgboot preflight` to check everything is ready.

mod environment;
mod host_tools;

use anyhow::{bail, Result};
use std::fmt;

use crate::config::Config;

/// How a check came out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Ready,
    /// Assembly cannot succeed.
    Blocking,
    /// Only some image configurations are affected.
    Advisory,
}

impl Outcome {
    fn tag(self) -> &'static str {
        match self {
            Outcome::Ready => "ok",
            Outcome::Blocking => "missing",
            Outcome::Advisory => "optional",
        }
    }
}

/// One host tool or asset and what was found for it.
#[derive(Debug, Clone)]
pub struct Check {
    pub name: String,
    pub outcome: Outcome,
    /// Where it was found, or what to do about it.
    pub note: String,
}

impl Check {
    pub fn new(name: &str, outcome: Outcome, note: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            outcome,
            note: note.into(),
        }
    }
}

pub struct PreflightReport {
    checks: Vec<Check>,
}

impl PreflightReport {
    pub fn new(checks: Vec<Check>) -> Self {
        Self { checks }
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    /// Checks that stop assembly.
    pub fn blocking(&self) -> impl Iterator<Item = &Check> {
        self.checks.iter().filter(|c| c.outcome == Outcome::Blocking)
    }

    pub fn is_ready(&self) -> bool {
        self.blocking().next().is_none()
    }
}

/// One line per check, then a single summary line.
impl fmt::Display for PreflightReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.checks.iter().map(|c| c.name.len()).max().unwrap_or(0);
        for check in &self.checks {
            writeln!(
                f,
                "  {:<11}{:<width$}  {}",
                format!("[{}]", check.outcome.tag()),
                check.name,
                check.note,
                width = width
            )?;
        }

        let advisory = self
            .checks
            .iter()
            .filter(|c| c.outcome == Outcome::Advisory)
            .count();
        writeln!(
            f,
            "{} checks, {} missing, {} optional",
            self.checks.len(),
            self.blocking().count(),
            advisory
        )
    }
}

/// Run all preflight checks.
pub fn run_preflight(config: &Config) -> PreflightReport {
    println!("Checking host tools and boot assets...");
    let mut checks = host_tools::check_host_tools();
    checks.extend(environment::check_environment(config));
    PreflightReport::new(checks)
}

/// Run preflight and bail if anything blocks assembly.
pub fn run_preflight_or_fail(config: &Config) -> Result<()> {
    let report = run_preflight(config);
    print!("{}", report);

    let missing: Vec<&str> = report.blocking().map(|c| c.name.as_str()).collect();
    if !missing.is_empty() {
        bail!("Preflight failed, missing: {}", missing.join(", "));
    }
    Ok(())
}
