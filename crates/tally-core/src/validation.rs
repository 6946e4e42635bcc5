//! Request validation rules.

use crate::requests::{
    CreateArtifactRequest, CreateCostRateRequest, CreateEventRequest, CreateJobRequest,
    UpdateJobRequest,
};

/// Stable validation error codes surfaced at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationCode {
    InvalidJobType,
    InvalidArtifactType,
    InvalidEventType,
    InvalidLevel,
    InvalidCursor,
    NegativeValue,
    RequiredField,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidJobType => "INVALID_JOB_TYPE",
            Self::InvalidArtifactType => "INVALID_ARTIFACT_TYPE",
            Self::InvalidEventType => "INVALID_EVENT_TYPE",
            Self::InvalidLevel => "INVALID_LEVEL",
            Self::InvalidCursor => "INVALID_CURSOR",
            Self::NegativeValue => "NEGATIVE_VALUE",
            Self::RequiredField => "REQUIRED_FIELD",
        }
    }
}

impl std::fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A coded validation failure.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{code}: {detail}")]
pub struct ValidationError {
    pub code: ValidationCode,
    pub detail: String,
}

impl ValidationError {
    pub fn new(code: ValidationCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }
}

type Result = std::result::Result<(), ValidationError>;

/// Validates a job-creation request.
pub fn validate_create_job(req: &CreateJobRequest) -> Result {
    if req.title.trim().is_empty() {
        return Err(ValidationError::new(
            ValidationCode::RequiredField,
            "title must not be empty",
        ));
    }
    if !req.job_type.is_builtin() {
        return Err(ValidationError::new(
            ValidationCode::InvalidJobType,
            format!("unknown job type '{}'", req.job_type),
        ));
    }
    Ok(())
}

/// Validates a job update.
pub fn validate_update_job(req: &UpdateJobRequest) -> Result {
    if let Some(ref status) = req.status {
        if !status.is_builtin() {
            return Err(ValidationError::new(
                ValidationCode::InvalidJobType,
                format!("unknown status '{status}'"),
            ));
        }
    }
    if let Some(ref title) = req.title {
        if title.trim().is_empty() {
            return Err(ValidationError::new(
                ValidationCode::RequiredField,
                "title must not be empty",
            ));
        }
    }
    for (field, value) in [
        ("input_tokens", req.input_tokens),
        ("output_tokens", req.output_tokens),
        ("duration_ms", req.duration_ms),
    ] {
        if let Some(v) = value {
            if v < 0 {
                return Err(ValidationError::new(
                    ValidationCode::NegativeValue,
                    format!("{field} must be >= 0 (got {v})"),
                ));
            }
        }
    }
    if let Some(cost) = req.total_cost {
        if cost < 0.0 {
            return Err(ValidationError::new(
                ValidationCode::NegativeValue,
                format!("total_cost must be >= 0 (got {cost})"),
            ));
        }
    }
    Ok(())
}

/// Validates an artifact-creation request.
pub fn validate_create_artifact(req: &CreateArtifactRequest) -> Result {
    if req.job_id.is_empty() {
        return Err(ValidationError::new(
            ValidationCode::RequiredField,
            "job_id must not be empty",
        ));
    }
    if req.name.trim().is_empty() {
        return Err(ValidationError::new(
            ValidationCode::RequiredField,
            "name must not be empty",
        ));
    }
    if !req.artifact_type.is_builtin() {
        return Err(ValidationError::new(
            ValidationCode::InvalidArtifactType,
            format!("unknown artifact type '{}'", req.artifact_type),
        ));
    }
    Ok(())
}

/// Validates an event-creation request.
pub fn validate_create_event(req: &CreateEventRequest) -> Result {
    if req.job_id.is_empty() {
        return Err(ValidationError::new(
            ValidationCode::RequiredField,
            "job_id must not be empty",
        ));
    }
    if !req.event_type.is_builtin() {
        return Err(ValidationError::new(
            ValidationCode::InvalidEventType,
            format!("unknown event type '{}'", req.event_type),
        ));
    }
    if let Some(ref level) = req.level {
        if !level.is_builtin() {
            return Err(ValidationError::new(
                ValidationCode::InvalidLevel,
                format!("unknown level '{level}'"),
            ));
        }
    }
    Ok(())
}

/// Validates a cost-rate registration.
pub fn validate_cost_rate(req: &CreateCostRateRequest) -> Result {
    if req.provider.is_empty() || req.model.is_empty() {
        return Err(ValidationError::new(
            ValidationCode::RequiredField,
            "provider and model must not be empty",
        ));
    }
    if req.input_token_rate < 0.0 || req.output_token_rate < 0.0 {
        return Err(ValidationError::new(
            ValidationCode::NegativeValue,
            "token rates must be >= 0",
        ));
    }
    if let Some(to) = req.effective_to {
        if to < req.effective_from {
            return Err(ValidationError::new(
                ValidationCode::NegativeValue,
                "effective_to must not precede effective_from",
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::{EventType, JobType};

    #[test]
    fn empty_title_fails() {
        let req = CreateJobRequest {
            title: "  ".into(),
            ..Default::default()
        };
        let err = validate_create_job(&req).unwrap_err();
        assert_eq!(err.code, ValidationCode::RequiredField);
    }

    #[test]
    fn custom_job_type_fails() {
        let req = CreateJobRequest {
            title: "t".into(),
            job_type: JobType::Custom("telepathy".into()),
            ..Default::default()
        };
        let err = validate_create_job(&req).unwrap_err();
        assert_eq!(err.code, ValidationCode::InvalidJobType);
    }

    #[test]
    fn negative_tokens_fail() {
        let req = UpdateJobRequest {
            input_tokens: Some(-1),
            ..Default::default()
        };
        let err = validate_update_job(&req).unwrap_err();
        assert_eq!(err.code, ValidationCode::NegativeValue);
    }

    #[test]
    fn custom_event_type_fails() {
        let req = CreateEventRequest {
            job_id: "j1".into(),
            event_type: EventType::Custom("running".into()),
            ..Default::default()
        };
        let err = validate_create_event(&req).unwrap_err();
        assert_eq!(err.code, ValidationCode::InvalidEventType);
    }

    #[test]
    fn valid_event_passes() {
        let req = CreateEventRequest {
            job_id: "j1".into(),
            event_type: EventType::Progress,
            ..Default::default()
        };
        assert!(validate_create_event(&req).is_ok());
    }

    #[test]
    fn inverted_rate_window_fails() {
        let req = CreateCostRateRequest {
            provider: "openai".into(),
            model: "gpt-4o".into(),
            input_token_rate: 0.0025,
            output_token_rate: 0.01,
            currency: None,
            effective_from: "2024-07-01".parse().unwrap(),
            effective_to: Some("2024-01-01".parse().unwrap()),
        };
        assert!(validate_cost_rate(&req).is_err());
    }
}
