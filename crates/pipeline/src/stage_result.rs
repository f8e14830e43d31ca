//! Generic per-stage result envelope, used to carry a stage's output
//! alongside its validation outcome and timing without every stage
//! reinventing the same wrapper shape.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use validation::ValidationReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Ok,
    OkWithWarnings,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageResult<T> {
    pub stage_name: &'static str,
    pub status: StageStatus,
    pub data: Option<T>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    #[serde(with = "duration_as_millis")]
    pub duration: Duration,
}

impl<T> StageResult<T> {
    pub fn success(stage_name: &'static str, data: T, report: ValidationReport, duration: Duration) -> Self {
        let status = if !report.valid {
            StageStatus::Failed
        } else if report.warnings.is_empty() {
            StageStatus::Ok
        } else {
            StageStatus::OkWithWarnings
        };
        Self {
            stage_name,
            status,
            data: Some(data),
            errors: report.errors,
            warnings: report.warnings,
            duration,
        }
    }

    pub fn failure(stage_name: &'static str, errors: Vec<String>, duration: Duration) -> Self {
        Self {
            stage_name,
            status: StageStatus::Failed,
            data: None,
            errors,
            warnings: Vec::new(),
            duration,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status != StageStatus::Failed
    }
}

mod duration_as_millis {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u128(duration.as_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_with_no_warnings_is_plain_ok() {
        let result: StageResult<i32> =
            StageResult::success("s3", 42, ValidationReport::new(), Duration::from_millis(5));
        assert_eq!(result.status, StageStatus::Ok);
        assert!(result.is_ok());
    }

    #[test]
    fn success_with_warnings_is_ok_with_warnings() {
        let mut report = ValidationReport::new();
        report.record_warning("check", "borderline value");
        let result: StageResult<i32> = StageResult::success("s4", 1, report, Duration::from_millis(1));
        assert_eq!(result.status, StageStatus::OkWithWarnings);
        assert!(result.is_ok());
    }

    #[test]
    fn failure_has_no_data() {
        let result: StageResult<i32> =
            StageResult::failure("s5", vec!["boom".to_string()], Duration::from_millis(1));
        assert!(!result.is_ok());
        assert!(result.data.is_none());
    }
}
