//! Shared `Stage` capability trait and structural/domain validation
//! framework used by every pipeline stage (S2-S5).
//!
//! A stage validates its input before doing any work, its output before
//! handing it to the next stage, and can snapshot its output to JSON for
//! the pipeline's validation-artifact trail. None of this is stage-specific
//! numerical logic — that lives in each stage's own crate — this crate only
//! owns the shared shape of "did this stage's input/output make sense".

use serde::Serialize;
use tracing::{error, warn};

/// One named pass/fail check, kept even when it passes so a validation
/// report can show everything that was checked, not only what failed.
#[derive(Debug, Clone)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    pub message: Option<String>,
}

/// The accumulated result of validating a stage's input or output.
/// `valid` is false whenever `errors` is non-empty; warnings never flip it.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub checks: Vec<ValidationCheck>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
            checks: Vec::new(),
        }
    }

    pub fn record_error(&mut self, check_name: impl Into<String>, message: impl Into<String>) {
        let check_name = check_name.into();
        let message = message.into();
        error!(check = %check_name, %message, "validation check failed");
        self.errors.push(message.clone());
        self.valid = false;
        self.checks.push(ValidationCheck {
            name: check_name,
            passed: false,
            message: Some(message),
        });
    }

    pub fn record_warning(&mut self, check_name: impl Into<String>, message: impl Into<String>) {
        let check_name = check_name.into();
        let message = message.into();
        warn!(check = %check_name, %message, "validation check raised a warning");
        self.warnings.push(message.clone());
        self.checks.push(ValidationCheck {
            name: check_name,
            passed: true,
            message: Some(message),
        });
    }

    pub fn record_pass(&mut self, check_name: impl Into<String>) {
        self.checks.push(ValidationCheck {
            name: check_name.into(),
            passed: true,
            message: None,
        });
    }

    /// A finite-value check, the most common structural check in this
    /// pipeline (NaN/infinite physics output is always a defect, never a
    /// legitimate result).
    pub fn check_finite(&mut self, check_name: &str, value: f64) {
        if value.is_finite() {
            self.record_pass(check_name);
        } else {
            self.record_error(check_name, format!("{check_name} is not finite: {value}"));
        }
    }

    /// A bounded-range check. Out-of-range is recorded as a warning, not an
    /// error, since range checks in this pipeline are sanity bounds
    /// (e.g. LEO altitude band) rather than hard structural invariants.
    pub fn check_range(&mut self, check_name: &str, value: f64, min: f64, max: f64) {
        if value < min || value > max {
            self.record_warning(
                check_name,
                format!("{check_name}={value} outside expected range [{min}, {max}]"),
            );
        } else {
            self.record_pass(check_name);
        }
    }

    /// Fold another report's errors/warnings/checks into this one.
    pub fn merge(&mut self, other: ValidationReport) {
        self.valid = self.valid && other.valid;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
        self.checks.extend(other.checks);
    }
}

/// Capability implemented by every pipeline stage: validate its own input
/// and output, and snapshot output to JSON for the validation-artifact
/// trail (spec.md §7).
pub trait Stage {
    type Input;
    type Output: Serialize;

    fn name(&self) -> &'static str;

    fn validate_input(&self, input: &Self::Input) -> ValidationReport;
    fn validate_output(&self, output: &Self::Output) -> ValidationReport;

    /// Default composition: input validation then output validation,
    /// merged. Stages with cross-cutting checks (e.g. "output count never
    /// exceeds input count") should override this rather than the two
    /// halves separately.
    fn run_validation_checks(&self, input: &Self::Input, output: &Self::Output) -> ValidationReport {
        let mut report = self.validate_input(input);
        report.merge(self.validate_output(output));
        report
    }

    fn snapshot(&self, output: &Self::Output) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(output)
    }
}
