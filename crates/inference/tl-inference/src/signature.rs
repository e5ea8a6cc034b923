//! Offline inference client scoring known attack signatures.
//!
//! Decodes the byte tokens back into payload text and looks for common web
//! attack patterns. Useful as a stand-in for a model server and as a
//! deterministic client for local runs.

use crate::features::decode_tokens;
use async_trait::async_trait;
use tl_error::InferenceError;
use tl_traits::InferenceClient;
use tl_types::FeatureVector;

/// Score given to payloads with no signature match.
const BASELINE_SCORE: f64 = 0.05;

/// A family of signatures and the score a match earns.
struct Signature {
    family: &'static str,
    score: f64,
    needles: &'static [&'static str],
}

const SIGNATURES: &[Signature] = &[
    Signature {
        family: "sql-injection",
        score: 0.95,
        needles: &["' or '1'='1", "' or 1=1", "union select", "'; drop table", "--'"],
    },
    Signature {
        family: "path-traversal",
        score: 0.9,
        needles: &["../", "..\\", "%2e%2e%2f", "/etc/passwd"],
    },
    Signature {
        family: "xss",
        score: 0.9,
        needles: &["<script", "javascript:", "onerror=", "onload="],
    },
    Signature {
        family: "command-injection",
        score: 0.85,
        needles: &["cmd.exe", "/bin/sh", "; rm -rf", "| nc ", "$(", "powershell -"],
    },
];

/// Inference client backed by signature matching.
#[derive(Debug, Clone)]
pub struct SignatureClient {
    feature_length: usize,
}

impl SignatureClient {
    /// Creates a client expecting vectors of `feature_length` tokens.
    pub fn new(feature_length: usize) -> Self {
        Self { feature_length }
    }

    /// Scores a single payload.
    pub fn score_text(text: &str) -> f64 {
        let lowered = text.to_lowercase();
        SIGNATURES
            .iter()
            .filter(|sig| sig.needles.iter().any(|n| lowered.contains(n)))
            .map(|sig| sig.score)
            .fold(BASELINE_SCORE, f64::max)
    }

    /// Returns the signature family matching `text`, if any.
    pub fn matched_family(text: &str) -> Option<&'static str> {
        let lowered = text.to_lowercase();
        SIGNATURES
            .iter()
            .find(|sig| sig.needles.iter().any(|n| lowered.contains(n)))
            .map(|sig| sig.family)
    }
}

#[async_trait]
impl InferenceClient for SignatureClient {
    async fn infer(&self, features: &[FeatureVector]) -> Result<Vec<f64>, InferenceError> {
        features
            .iter()
            .map(|vector| {
                if vector.len() != self.feature_length {
                    return Err(InferenceError::Malformed(format!(
                        "expected {} features, got {}",
                        self.feature_length,
                        vector.len()
                    )));
                }
                Ok(Self::score_text(&decode_tokens(vector.tokens())))
            })
            .collect()
    }

    fn name(&self) -> &str {
        "signature"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::encode_payload;

    #[test]
    fn test_known_attacks_score_high() {
        for payload in [
            "' OR '1'='1",
            "../../../etc/passwd",
            "<script>alert('XSS')</script>",
            "cmd.exe /c whoami",
        ] {
            let score = SignatureClient::score_text(payload);
            assert!(score >= 0.7, "{} scored {}", payload, score);
            assert!(SignatureClient::matched_family(payload).is_some());
        }
    }

    #[test]
    fn test_benign_traffic_scores_low() {
        for payload in [
            "GET /index.html HTTP/1.1",
            "POST /api/users HTTP/1.1",
            "normal network traffic",
        ] {
            assert_eq!(SignatureClient::score_text(payload), BASELINE_SCORE);
            assert!(SignatureClient::matched_family(payload).is_none());
        }
    }

    #[tokio::test]
    async fn test_infer_scores_each_vector() {
        let client = SignatureClient::new(64);
        let features = vec![
            encode_payload("GET /index.html HTTP/1.1", 64),
            encode_payload("<SCRIPT>alert(1)</SCRIPT>", 64),
        ];

        let scores = client.infer(&features).await.unwrap();
        assert_eq!(scores, vec![BASELINE_SCORE, 0.9]);
    }

    #[tokio::test]
    async fn test_wrong_length_is_malformed() {
        let client = SignatureClient::new(128);
        let features = vec![encode_payload("hello", 64)];

        let result = client.infer(&features).await;
        assert!(matches!(result, Err(InferenceError::Malformed(_))));
    }
}
