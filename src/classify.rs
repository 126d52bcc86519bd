//! Attachment classification: remote text classifier, combined decision,
//! and the cached end-to-end pipeline.
//!
//! The remote classifier is an opaque network service with a chat-completions
//! shaped API. It is asked for a single categorical token at temperature 0
//! under a hard timeout. Transport errors, timeouts, and malformed responses
//! all map to [`ClassifierError`] ("remote unavailable"), which the decision
//! rule treats as a definitive reject (fail-closed), never as an accept and
//! never as a pipeline failure.
//!
//! Confidence constants are product-tuned, not model-derived; they are
//! carried as-is.

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{self, VerdictCache};
use crate::config::ClassifierConfig;
use crate::extract::TextExtractor;
use crate::heuristics;
use crate::models::{Classification, ClassificationVerdict, FieldGuesses};

/// Remote positive with heuristic agreement.
pub const CONFIDENCE_STRONG_ACCEPT: u8 = 95;
/// Remote positive alone.
pub const CONFIDENCE_REMOTE_ACCEPT: u8 = 85;
/// Remote negative overriding a heuristic pass (low trust in the override).
pub const CONFIDENCE_DISAGREEMENT: u8 = 30;
/// Ceiling for heuristic-proportional reject confidence.
pub const CONFIDENCE_HEURISTIC_CEILING: u8 = 20;

const CLASSIFIER_PROMPT: &str = "You label document excerpts. Reply with exactly one token: \
WARRANTY if the excerpt is a product warranty certificate, warranty card, or purchase receipt \
with warranty terms; otherwise NOT_WARRANTY.";

/// Why the remote classifier was unavailable. Timeout is distinguished so
/// the rejection reason can say so.
#[derive(Debug)]
pub enum ClassifierError {
    Timeout,
    Transport(String),
    Malformed(String),
}

impl std::fmt::Display for ClassifierError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClassifierError::Timeout => write!(f, "classifier request timed out"),
            ClassifierError::Transport(e) => write!(f, "classifier transport error: {}", e),
            ClassifierError::Malformed(e) => write!(f, "classifier response malformed: {}", e),
        }
    }
}

impl std::error::Error for ClassifierError {}

/// Binary label returned by the remote classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteLabel {
    Warranty,
    NotWarranty,
}

impl RemoteLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteLabel::Warranty => "warranty",
            RemoteLabel::NotWarranty => "not_warranty",
        }
    }
}

/// The opaque network classifier contract.
#[async_trait]
pub trait TextClassifier: Send + Sync {
    async fn classify(&self, excerpt: &str) -> Result<RemoteLabel, ClassifierError>;
}

// ============ HTTP classifier ============

/// Classifier backed by a chat-completions style HTTP endpoint.
pub struct HttpClassifier {
    endpoint: String,
    model: String,
    api_key: String,
    max_completion_tokens: u32,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

impl HttpClassifier {
    pub fn new(config: &ClassifierConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            anyhow::anyhow!("{} environment variable not set", config.api_key_env)
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            api_key,
            max_completion_tokens: config.max_completion_tokens,
            client,
        })
    }
}

#[async_trait]
impl TextClassifier for HttpClassifier {
    async fn classify(&self, excerpt: &str) -> Result<RemoteLabel, ClassifierError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": 0.0,
            "max_tokens": self.max_completion_tokens,
            "messages": [
                { "role": "system", "content": CLASSIFIER_PROMPT },
                { "role": "user", "content": excerpt },
            ],
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClassifierError::Timeout
                } else {
                    ClassifierError::Transport(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(ClassifierError::Transport(format!(
                "HTTP {}",
                resp.status()
            )));
        }

        let parsed: ChatResponse = resp
            .json()
            .await
            .map_err(|e| ClassifierError::Malformed(e.to_string()))?;

        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| ClassifierError::Malformed("no choices in response".to_string()))?;

        parse_label(content)
    }
}

/// Normalize the classifier's short text response into a label.
fn parse_label(raw: &str) -> Result<RemoteLabel, ClassifierError> {
    let normalized = raw.trim().to_lowercase();
    // Negations first: "not_warranty" contains "warranty".
    if normalized.contains("not_warranty")
        || normalized.contains("not a warranty")
        || normalized.starts_with("no")
    {
        Ok(RemoteLabel::NotWarranty)
    } else if normalized.contains("warranty") || normalized.starts_with("yes") {
        Ok(RemoteLabel::Warranty)
    } else {
        Err(ClassifierError::Malformed(format!(
            "unrecognized label: {:?}",
            raw
        )))
    }
}

// ============ Combined decision ============

/// Combine the heuristic score and the remote outcome into a final verdict.
pub fn decide(
    heuristic_score: i32,
    matched: &[&'static str],
    remote: Result<RemoteLabel, ClassifierError>,
) -> ClassificationVerdict {
    let heuristic_pass = heuristics::passes(heuristic_score);

    match remote {
        Ok(RemoteLabel::Warranty) => ClassificationVerdict {
            is_warranty: true,
            confidence: if heuristic_pass {
                CONFIDENCE_STRONG_ACCEPT
            } else {
                CONFIDENCE_REMOTE_ACCEPT
            },
            heuristic_score,
            remote_label: Some(RemoteLabel::Warranty.as_str().to_string()),
            reason: if heuristic_pass {
                format!(
                    "classifier and heuristics agree (matched: {})",
                    matched.join(", ")
                )
            } else {
                "classifier accepted; heuristics below threshold".to_string()
            },
        },
        Ok(RemoteLabel::NotWarranty) => {
            let confidence = if heuristic_pass {
                CONFIDENCE_DISAGREEMENT
            } else {
                u8::try_from(heuristic_score.max(0) * 5)
                    .unwrap_or(CONFIDENCE_HEURISTIC_CEILING)
                    .min(CONFIDENCE_HEURISTIC_CEILING)
            };
            ClassificationVerdict {
                is_warranty: false,
                confidence,
                heuristic_score,
                remote_label: Some(RemoteLabel::NotWarranty.as_str().to_string()),
                reason: if heuristic_pass {
                    "classifier rejected despite heuristic pass".to_string()
                } else {
                    "classifier and heuristics both rejected".to_string()
                },
            }
        }
        // Fail closed: never accept on external-service failure.
        Err(e) => ClassificationVerdict {
            is_warranty: false,
            confidence: 0,
            heuristic_score,
            remote_label: None,
            reason: match e {
                ClassifierError::Timeout => {
                    "classifier timed out; rejecting by default".to_string()
                }
                other => format!("classifier unavailable ({}); rejecting by default", other),
            },
        },
    }
}

// ============ Cached pipeline ============

/// The end-to-end classification pipeline: content hash → cache → text
/// extraction → heuristic score + remote call → decision. Never errors;
/// every failure mode is a rejecting verdict.
pub struct ClassificationPipeline {
    cache: Arc<VerdictCache>,
    extractor: Arc<dyn TextExtractor>,
    classifier: Arc<dyn TextClassifier>,
    max_excerpt_chars: usize,
}

impl ClassificationPipeline {
    pub fn new(
        cache: Arc<VerdictCache>,
        extractor: Arc<dyn TextExtractor>,
        classifier: Arc<dyn TextClassifier>,
        max_excerpt_chars: usize,
    ) -> Self {
        Self {
            cache,
            extractor,
            classifier,
            max_excerpt_chars,
        }
    }

    pub async fn classify_bytes(&self, bytes: &[u8]) -> Classification {
        let hash = cache::content_hash(bytes);
        if let Some(hit) = self.cache.get(&hash) {
            return hit;
        }

        let classification = self.classify_uncached(hash, bytes).await;
        self.cache.insert(classification.clone());
        classification
    }

    async fn classify_uncached(&self, content_hash: String, bytes: &[u8]) -> Classification {
        let text = match self.extractor.extract(bytes) {
            Ok(text) => text,
            Err(e) => {
                return Classification {
                    content_hash,
                    verdict: ClassificationVerdict::rejected(format!(
                        "text extraction failed: {}",
                        e
                    )),
                    guesses: FieldGuesses::default(),
                };
            }
        };

        let (score, matched) = heuristics::score(&text);
        let excerpt = truncate_excerpt(&text, self.max_excerpt_chars);
        let remote = self.classifier.classify(excerpt).await;
        let verdict = decide(score, &matched, remote);

        let guesses = if verdict.is_warranty {
            heuristics::guess_fields(&text)
        } else {
            FieldGuesses::default()
        };

        Classification {
            content_hash,
            verdict,
            guesses,
        }
    }
}

/// Bound the excerpt sent over the network, respecting char boundaries.
fn truncate_excerpt(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_positive_with_heuristic_pass_is_95() {
        let verdict = decide(4, &["warranty"], Ok(RemoteLabel::Warranty));
        assert!(verdict.is_warranty);
        assert_eq!(verdict.confidence, 95);
    }

    #[test]
    fn remote_positive_without_heuristic_pass_is_85() {
        let verdict = decide(1, &[], Ok(RemoteLabel::Warranty));
        assert!(verdict.is_warranty);
        assert_eq!(verdict.confidence, 85);
    }

    #[test]
    fn remote_negative_against_heuristic_pass_is_30() {
        let verdict = decide(5, &["warranty"], Ok(RemoteLabel::NotWarranty));
        assert!(!verdict.is_warranty);
        assert_eq!(verdict.confidence, 30);
    }

    #[test]
    fn remote_negative_confidence_proportional_to_heuristic() {
        let verdict = decide(2, &[], Ok(RemoteLabel::NotWarranty));
        assert!(!verdict.is_warranty);
        assert_eq!(verdict.confidence, 10);

        let verdict = decide(0, &[], Ok(RemoteLabel::NotWarranty));
        assert_eq!(verdict.confidence, 0);
    }

    #[test]
    fn timeout_rejects_regardless_of_heuristic() {
        let verdict = decide(10, &["warranty"], Err(ClassifierError::Timeout));
        assert!(!verdict.is_warranty);
        assert_eq!(verdict.confidence, 0);
        assert!(verdict.reason.contains("timed out"));
    }

    #[test]
    fn transport_error_rejects_with_distinct_reason() {
        let verdict = decide(
            10,
            &["warranty"],
            Err(ClassifierError::Transport("HTTP 503".to_string())),
        );
        assert!(!verdict.is_warranty);
        assert!(verdict.reason.contains("unavailable"));
        assert!(!verdict.reason.contains("timed out"));
    }

    #[test]
    fn label_parsing_handles_negation_first() {
        assert_eq!(parse_label("NOT_WARRANTY").unwrap(), RemoteLabel::NotWarranty);
        assert_eq!(parse_label("WARRANTY").unwrap(), RemoteLabel::Warranty);
        assert_eq!(parse_label(" warranty\n").unwrap(), RemoteLabel::Warranty);
        assert_eq!(
            parse_label("No, not a warranty.").unwrap(),
            RemoteLabel::NotWarranty
        );
        assert!(parse_label("maybe").is_err());
    }

    #[test]
    fn excerpt_truncation_respects_char_boundaries() {
        assert_eq!(truncate_excerpt("héllo", 2), "hé");
        assert_eq!(truncate_excerpt("short", 100), "short");
    }
}
