// Excel extraction client.
//
// The dashboard never parses workbooks itself: the uploaded file is
// base64-encoded and handed to an external extraction function, which
// returns per-measure gap counts as JSON. This module owns that call and
// validates the response into a typed record before anything downstream
// sees it.

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Extractor request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Extractor returned an error (status {status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Invalid extractor response: {0}")]
    Invalid(String),
}

/// Request body for the extraction function.
#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    excel_file: &'a str,
    date_param: &'a str,
    is_base64: bool,
}

/// Validated extraction result. Every count is required: a response missing
/// a field is rejected here instead of being coalesced to null and
/// discovered later as a silently empty chart column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapMetrics {
    pub diabetes: i64,
    pub blood_pressure: i64,
    pub breast_cancer: i64,
    pub colorectal_cancer: i64,
    pub date: String,
}

impl GapMetrics {
    fn validate(self) -> Result<Self, ExtractError> {
        if self.date.is_empty() {
            return Err(ExtractError::Invalid(
                "date field is empty".to_string(),
            ));
        }
        for (name, count) in [
            ("diabetes", self.diabetes),
            ("blood_pressure", self.blood_pressure),
            ("breast_cancer", self.breast_cancer),
            ("colorectal_cancer", self.colorectal_cancer),
        ] {
            if count < 0 {
                return Err(ExtractError::Invalid(format!(
                    "{} count is negative: {}",
                    name, count
                )));
            }
        }
        Ok(self)
    }
}

/// Parse and validate an extractor response body. Split out of the HTTP
/// call so it can be tested without a network.
pub fn parse_extractor_response(status: u16, body: &str) -> Result<GapMetrics, ExtractError> {
    if status != 200 {
        // Error bodies are {"error": "..."} when the extractor got far
        // enough to produce one.
        let message = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
            .unwrap_or_else(|| body.to_string());
        return Err(ExtractError::Remote { status, message });
    }

    let metrics: GapMetrics = serde_json::from_str(body)
        .map_err(|e| ExtractError::Invalid(e.to_string()))?;
    metrics.validate()
}

#[derive(Debug, Clone)]
pub struct ExtractorClient {
    http: reqwest::Client,
    endpoint: String,
}

impl ExtractorClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.to_string(),
        }
    }

    /// Send workbook bytes to the extraction function and return the
    /// validated counts.
    pub async fn extract(&self, file: &[u8], date: &str) -> Result<GapMetrics, ExtractError> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(file);
        let request = ExtractRequest {
            excel_file: &encoded,
            date_param: date,
            is_base64: true,
        };

        let response = self.http.post(&self.endpoint).json(&request).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        parse_extractor_response(status, &body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_response_parses() {
        let body = r#"{
            "diabetes": 14,
            "blood_pressure": 9,
            "breast_cancer": 3,
            "colorectal_cancer": 7,
            "date": "2024-06-01"
        }"#;

        let metrics = parse_extractor_response(200, body).unwrap();
        assert_eq!(metrics.diabetes, 14);
        assert_eq!(metrics.colorectal_cancer, 7);
        assert_eq!(metrics.date, "2024-06-01");
    }

    #[test]
    fn test_missing_field_is_rejected() {
        // No colorectal_cancer key: must fail, not default to null/zero.
        let body = r#"{
            "diabetes": 14,
            "blood_pressure": 9,
            "breast_cancer": 3,
            "date": "2024-06-01"
        }"#;

        let err = parse_extractor_response(200, body).unwrap_err();
        assert!(matches!(err, ExtractError::Invalid(_)));
    }

    #[test]
    fn test_negative_count_is_rejected() {
        let body = r#"{
            "diabetes": -1,
            "blood_pressure": 9,
            "breast_cancer": 3,
            "colorectal_cancer": 7,
            "date": "2024-06-01"
        }"#;

        let err = parse_extractor_response(200, body).unwrap_err();
        assert!(matches!(err, ExtractError::Invalid(_)));
    }

    #[test]
    fn test_empty_date_is_rejected() {
        let body = r#"{
            "diabetes": 1,
            "blood_pressure": 9,
            "breast_cancer": 3,
            "colorectal_cancer": 7,
            "date": ""
        }"#;

        let err = parse_extractor_response(200, body).unwrap_err();
        assert!(matches!(err, ExtractError::Invalid(_)));
    }

    #[test]
    fn test_remote_error_surfaces_message() {
        let body = r#"{"error": "Expected column 'Care Gap' not found"}"#;

        let err = parse_extractor_response(400, body).unwrap_err();
        match err {
            ExtractError::Remote { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Expected column 'Care Gap' not found");
            }
            other => panic!("expected Remote error, got {:?}", other),
        }
    }

    #[test]
    fn test_request_payload_shape() {
        let request = ExtractRequest {
            excel_file: "AAEC",
            date_param: "2024-06-01",
            is_base64: true,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["excel_file"], "AAEC");
        assert_eq!(json["date_param"], "2024-06-01");
        assert_eq!(json["is_base64"], true);
    }
}
