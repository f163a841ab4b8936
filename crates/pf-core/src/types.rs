//! Common data types for ProFit

use serde::{Deserialize, Serialize};

/// Post-fit record for a single parameter of interest.
///
/// This is the terminal state of a fit POI: its best-fit value plus whatever
/// error estimates the enabled stages produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoiEstimate {
    /// Parameter name
    pub name: String,

    /// Best-fit value
    pub value: f64,

    /// Symmetric error (covariance diagonal). Zero if no error pass ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<f64>,

    /// Asymmetric lower error (negative side), from the profiling pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_lo: Option<f64>,

    /// Asymmetric upper error (positive side), from the profiling pass.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_hi: Option<f64>,
}

impl PoiEstimate {
    /// Record with a value only (no error pass ran).
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self { name: name.into(), value, error: None, error_lo: None, error_hi: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poi_estimate_serializes_without_absent_errors() {
        let est = PoiEstimate::new("mu", 1.25);
        let json = serde_json::to_string(&est).unwrap();
        assert!(json.contains("\"mu\""));
        assert!(!json.contains("error"));
    }
}
