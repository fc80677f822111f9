use std::sync::Arc;

use shared::Verdict;

use super::client::VisionModel;

pub const VALIDATION_PROMPT: &str = r#"
You are analyzing two images in a single evaluation. The first image is a real, clear photo of a physical receipt from an actual purchase, showing the purchase date, store name, and product details. The second image is a clear, non-blurry photo of the actual product that matches the receipt details. Both images must be directly related and represent a genuine purchase.

Analyze and answer:
1. What product(s) was purchased as shown on the receipt?
2. Does the product image match the purchased product on the receipt?

Strict validation rules:
- Receipt image: MUST be a genuine, clear photo (not a screenshot, digital receipt, or fabricated image) with purchase date, store name, and detailed product information that clearly connects to the product image.
- Product image: MUST be a genuine, clear photo (not a stock photo or screenshot) that clearly matches the details from the receipt.

Output your response as a JSON object with the following structure:
{
  "validityFactor": {validityFactorValue}, // 1 for valid, 0 for invalid
  "descriptionOfAnalysis": "{yourAnalysis}" // 1-3 sentences maximum, extremely concise.
}

Do not refer to the images by index. Keep your response extremely brief and to the point.
"#;

pub const ACCEPTED_FALLBACK: &str = "Your submission was accepted.";
pub const REJECTED_FALLBACK: &str =
    "Your submission could not be verified right now. Please try again later.";

/// Verdicts above this factor earn a reward.
pub const REWARD_THRESHOLD: f64 = 0.5;

/// Strips code-fence markup around the model's JSON and parses it.
pub fn parse_verdict(content: &str) -> Option<Verdict> {
    let cleaned = content.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    serde_json::from_str::<Verdict>(cleaned).ok()
}

pub fn fallback_verdict(fail_open: bool) -> Verdict {
    if fail_open {
        Verdict {
            validity_factor: 1.0,
            description_of_analysis: ACCEPTED_FALLBACK.to_string(),
        }
    } else {
        Verdict {
            validity_factor: 0.0,
            description_of_analysis: REJECTED_FALLBACK.to_string(),
        }
    }
}

pub fn earns_reward(verdict: &Verdict) -> bool {
    verdict.validity_factor > REWARD_THRESHOLD
}

#[derive(Clone)]
pub struct VerdictService {
    model: Arc<dyn VisionModel>,
    fail_open: bool,
}

impl VerdictService {
    pub fn new(model: Arc<dyn VisionModel>, fail_open: bool) -> Self {
        if fail_open {
            log::warn!("Verdict fallback is fail-open: model failures accept submissions");
        }
        Self { model, fail_open }
    }

    /// Asks the model about receipt and product together. Never fails.
    pub async fn assess(&self, images: &[String]) -> Verdict {
        match self.model.complete(VALIDATION_PROMPT, images).await {
            Ok(Some(content)) => match parse_verdict(&content) {
                Some(verdict) => verdict,
                None => self.fallback("Invalid JSON response"),
            },
            Ok(None) => self.fallback("Empty response received"),
            Err(e) => {
                log::error!("Vision model error: {}", e);
                self.fallback("Image validation failed")
            }
        }
    }

    fn fallback(&self, reason: &str) -> Verdict {
        log::warn!("Using fallback verdict (fail_open={}): {}", self.fail_open, reason);
        fallback_verdict(self.fail_open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::client::VisionError;
    use async_trait::async_trait;

    struct Canned(Result<Option<String>, u16>);

    #[async_trait]
    impl VisionModel for Canned {
        async fn complete(&self, _prompt: &str, _images: &[String]) -> Result<Option<String>, VisionError> {
            match &self.0 {
                Ok(content) => Ok(content.clone()),
                Err(status) => Err(VisionError::ApiError {
                    status: *status,
                    body: String::new(),
                }),
            }
        }
    }

    fn service(reply: Result<Option<String>, u16>, fail_open: bool) -> VerdictService {
        VerdictService::new(Arc::new(Canned(reply)), fail_open)
    }

    #[test]
    fn fenced_and_bare_json_parse_identically() {
        let bare = r#"{"validityFactor": 0, "descriptionOfAnalysis": "Receipt is a screenshot."}"#;
        let fenced = format!("```json\n{}\n```", bare);
        let plain_fence = format!("```{}```", bare);
        let expected = parse_verdict(bare).unwrap();
        assert_eq!(parse_verdict(&fenced).unwrap(), expected);
        assert_eq!(parse_verdict(&plain_fence).unwrap(), expected);
        assert_eq!(expected.validity_factor, 0.0);
    }

    #[test]
    fn malformed_content_does_not_parse() {
        assert!(parse_verdict("").is_none());
        assert!(parse_verdict("```json```").is_none());
        assert!(parse_verdict("I think it's valid").is_none());
        assert!(parse_verdict(r#"{"descriptionOfAnalysis": "no factor"}"#).is_none());
    }

    #[test]
    fn threshold() {
        let mut verdict = fallback_verdict(true);
        assert!(earns_reward(&verdict));
        verdict.validity_factor = 0.5;
        assert!(!earns_reward(&verdict));
        assert!(!earns_reward(&fallback_verdict(false)));
    }

    #[tokio::test]
    async fn parsed_verdict_is_returned() {
        let content = "```json\n{\"validityFactor\":1,\"descriptionOfAnalysis\":\"Matches.\"}\n```";
        let verdict = service(Ok(Some(content.to_string())), true).assess(&[]).await;
        assert_eq!(verdict.validity_factor, 1.0);
        assert_eq!(verdict.description_of_analysis, "Matches.");
    }

    #[tokio::test]
    async fn failures_fall_back_open() {
        for reply in [Ok(None), Ok(Some("not json".to_string())), Ok(Some("   ".to_string())), Err(500)] {
            let verdict = service(reply, true).assess(&[]).await;
            assert_eq!(verdict, fallback_verdict(true));
            assert_eq!(verdict.description_of_analysis, ACCEPTED_FALLBACK);
        }
    }

    #[tokio::test]
    async fn failures_fall_back_closed_when_configured() {
        let verdict = service(Err(502), false).assess(&[]).await;
        assert_eq!(verdict.validity_factor, 0.0);
        assert!(!earns_reward(&verdict));
    }
}
