use serde::{Deserialize, Serialize};

use crate::errors::GenerationError;

/// Body accepted on the inbound routes. Missing fields deserialize as empty
/// so they surface as a validation error rather than an extractor rejection.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateBody {
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub platform: String,
}

impl GenerateBody {
    pub fn into_request(self) -> Result<GenerationRequest, GenerationError> {
        GenerationRequest::new(self.input, self.platform)
    }
}

/// A validated generation request. Both fields hold visible text and are
/// forwarded upstream exactly as the caller sent them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationRequest {
    input: String,
    platform: String,
}

impl GenerationRequest {
    pub fn new(
        input: impl Into<String>,
        platform: impl Into<String>,
    ) -> Result<Self, GenerationError> {
        let input = input.into();
        let platform = platform.into();
        if input.trim().is_empty() || platform.trim().is_empty() {
            return Err(GenerationError::missing_fields());
        }

        Ok(Self { input, platform })
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn platform(&self) -> &str {
        &self.platform
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationResult {
    pub success: bool,
    pub input: String,
    pub platform: String,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl GenerationResult {
    pub fn success(request: &GenerationRequest, prompt: String) -> Self {
        Self {
            success: true,
            input: request.input.clone(),
            platform: request.platform.clone(),
            prompt,
            error: None,
            code: None,
        }
    }

    /// Failures never carry partial content. Takes the raw fields so that
    /// rejected bodies report in the same shape as failed generations.
    pub fn failure(
        input: impl Into<String>,
        platform: impl Into<String>,
        error: &GenerationError,
    ) -> Self {
        Self {
            success: false,
            input: input.into(),
            platform: platform.into(),
            prompt: String::new(),
            error: Some(error.to_string()),
            code: Some(error.code().to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_rejects_blank_fields() {
        let error =
            GenerationRequest::new("   ", "Blog").expect_err("blank input should fail");
        assert_eq!(error, GenerationError::missing_fields());

        let error = GenerationRequest::new("an idea", "").expect_err("empty platform should fail");
        assert_eq!(error.code(), "MISSING_FIELDS");
    }

    #[test]
    fn request_keeps_caller_text() {
        let request = GenerationRequest::new("  launch post \n", " Twitter ").expect("valid request");
        assert_eq!(request.input(), "  launch post \n");
        assert_eq!(request.platform(), " Twitter ");
    }

    #[test]
    fn missing_body_fields_become_validation_errors() {
        let body: GenerateBody =
            serde_json::from_str(r#"{"input":"hello"}"#).expect("body should deserialize");
        let error = body.into_request().expect_err("missing platform should fail");
        assert_eq!(error.code(), "MISSING_FIELDS");
    }

    #[test]
    fn failure_result_drops_prompt_and_carries_code() {
        let result = GenerationResult::failure("idea", "Email", &GenerationError::Timeout);

        assert!(!result.success);
        assert!(result.prompt.is_empty());
        assert_eq!(result.code.as_deref(), Some("TIMEOUT"));

        let json = serde_json::to_value(&result).expect("result should serialize");
        assert_eq!(json["input"], "idea");
        assert_eq!(json["code"], "TIMEOUT");
    }

    #[test]
    fn success_result_omits_error_fields() {
        let request = GenerationRequest::new("idea", "Blog").expect("valid request");
        let result = GenerationResult::success(&request, "Write it.".to_owned());
        let json = serde_json::to_value(&result).expect("result should serialize");

        assert_eq!(json["success"], true);
        assert_eq!(json["prompt"], "Write it.");
        assert!(json.get("error").is_none());
        assert!(json.get("code").is_none());
    }
}
