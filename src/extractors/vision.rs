//! Paid OCR using the Google Cloud Vision `images:annotate` REST API.

use std::{env, time::Duration};

use base64::{Engine as _, prelude::BASE64_STANDARD};
use keen_retry::{ExponentialJitter, ResolvedResult, RetryResult};
use serde_json::json;

use crate::{
    config::VisionConfig,
    prelude::*,
    retry::{
        IsKnownTransient, retry_result_fatal, retry_result_ok, try_fatal,
        try_potentially_transient,
    },
};

use super::{ImageData, TextExtractor};

/// How many times to retry a transient failure.
const RE_ATTEMPTS: u32 = 4;

/// Upper bound on a single backoff delay.
const MAX_BACKOFF_MILLIS: u64 = 20_000;

/// Extractor wrapping Google Cloud Vision document text detection.
pub struct VisionExtractor {
    client: reqwest::Client,
    config: VisionConfig,
    api_key: String,
}

impl VisionExtractor {
    /// Create a new Vision extractor. The API key is read from the environment
    /// variable named in `config`, which may be set in a `.env` file.
    pub fn new(config: VisionConfig) -> Result<Self> {
        let api_key = env::var(&config.api_key_var)
            .with_context(|| format!("{} must be set to use vision", config.api_key_var))?;
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            config,
            api_key,
        })
    }

    /// Build our request body.
    fn request_body(&self, image: &ImageData) -> serde_json::Value {
        json!({
            "requests": [{
                "image": { "content": BASE64_STANDARD.encode(&image.data) },
                "features": [{ "type": "DOCUMENT_TEXT_DETECTION" }],
                "imageContext": { "languageHints": [self.config.language_hint] },
            }]
        })
    }

    /// Make a single request.
    async fn annotate_once(
        &self,
        body: &serde_json::Value,
    ) -> RetryResult<(), (), String, anyhow::Error> {
        let response = try_potentially_transient!(
            self.client
                .post(&self.config.endpoint)
                .query(&[("key", &self.api_key)])
                .json(body)
                .send()
                .await
                .and_then(|response| response.error_for_status())
        );
        let response = try_fatal!(response.json::<AnnotateResponse>().await);
        let Some(result) = response.responses.into_iter().next() else {
            return retry_result_fatal(anyhow!("Vision returned no responses"));
        };
        if let Some(error) = result.error {
            return retry_result_fatal(anyhow!(
                "Vision error {}: {}",
                error.code.unwrap_or_default(),
                error.message.unwrap_or_default()
            ));
        }
        retry_result_ok(result.text().unwrap_or_default())
    }
}

#[async_trait]
impl TextExtractor for VisionExtractor {
    fn name(&self) -> &str {
        "vision"
    }

    fn timeout(&self) -> Duration {
        // Leave room for every retry and its backoff.
        (self.config.timeout() + Duration::from_millis(MAX_BACKOFF_MILLIS))
            * (RE_ATTEMPTS + 1)
    }

    #[instrument(level = "debug", skip_all)]
    async fn extract(&self, image: &ImageData) -> Result<String> {
        let body = self.request_body(image);

        // If we have a transient failure, back off exponentially. These match
        // `RE_ATTEMPTS` and `MAX_BACKOFF_MILLIS`.
        let jitter = ExponentialJitter::FromBackoffRange {
            backoff_range_millis: 500..=20_000,
            re_attempts: 4,
            jitter_ratio: 0.2,
        };

        let result = self
            .annotate_once(&body)
            .await
            .retry_with_async(|_| async { self.annotate_once(&body).await })
            .with_exponential_jitter(|| jitter)
            .await
            .inspect_recovered(|_, _, retry_errors_list| {
                warn!(
                    "Vision succeeded after retrying {} times (failed attempts: [{}])",
                    retry_errors_list.len(),
                    keen_retry::loggable_retry_errors(retry_errors_list)
                )
            })
            .inspect_given_up(|_, retry_errors_list, fatal_error| {
                error!(
                    "Vision FAILED after exhausting all {} retrying attempts with error {fatal_error:?}. Previous transient failures: [{}]",
                    retry_errors_list.len(),
                    keen_retry::loggable_retry_errors(retry_errors_list)
                )
            });

        match result {
            ResolvedResult::Ok { output, .. } | ResolvedResult::Recovered { output, .. } => {
                Ok(output)
            }
            ResolvedResult::Fatal { error, .. } => Err(error),
            ResolvedResult::GivenUp { fatal_error, .. }
            | ResolvedResult::Unrecoverable { fatal_error, .. } => Err(fatal_error),
        }
    }
}

/// The parts of an `images:annotate` response we use.
#[derive(Debug, Deserialize)]
struct AnnotateResponse {
    #[serde(default)]
    responses: Vec<AnnotateImageResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnnotateImageResponse {
    #[serde(default)]
    full_text_annotation: Option<FullTextAnnotation>,
    #[serde(default)]
    text_annotations: Vec<TextAnnotation>,
    #[serde(default)]
    error: Option<ApiStatus>,
}

impl AnnotateImageResponse {
    /// The full text, if the API found any.
    fn text(self) -> Option<String> {
        self.full_text_annotation
            .map(|annotation| annotation.text)
            .or_else(|| {
                self.text_annotations
                    .into_iter()
                    .next()
                    .map(|annotation| annotation.description)
            })
    }
}

#[derive(Debug, Deserialize)]
struct FullTextAnnotation {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct TextAnnotation {
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    code: Option<i64>,
    message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> VisionExtractor {
        VisionExtractor {
            client: reqwest::Client::new(),
            config: VisionConfig::default(),
            api_key: "test-key".to_owned(),
        }
    }

    #[test]
    fn request_asks_for_document_text_in_bengali() {
        let image = ImageData {
            mime_type: "image/png".to_owned(),
            data: b"abc".to_vec(),
        };
        let body = extractor().request_body(&image);
        let request = &body["requests"][0];
        assert_eq!(request["image"]["content"], "YWJj");
        assert_eq!(request["features"][0]["type"], "DOCUMENT_TEXT_DETECTION");
        assert_eq!(request["imageContext"]["languageHints"][0], "bn");
    }

    #[test]
    fn prefers_full_text_annotation() {
        let response: AnnotateResponse = serde_json::from_str(
            r#"{"responses": [{
                "fullTextAnnotation": {"text": "নাম: করিম"},
                "textAnnotations": [{"description": "other"}]
            }]}"#,
        )
        .unwrap();
        let result = response.responses.into_iter().next().unwrap();
        assert_eq!(result.text().as_deref(), Some("নাম: করিম"));
    }

    #[test]
    fn falls_back_to_text_annotations() {
        let response: AnnotateResponse = serde_json::from_str(
            r#"{"responses": [{"textAnnotations": [{"description": "১২৩"}]}]}"#,
        )
        .unwrap();
        let result = response.responses.into_iter().next().unwrap();
        assert_eq!(result.text().as_deref(), Some("১২৩"));

        let response: AnnotateResponse =
            serde_json::from_str(r#"{"responses": [{}]}"#).unwrap();
        let result = response.responses.into_iter().next().unwrap();
        assert_eq!(result.text(), None);
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let config = VisionConfig {
            api_key_var: "VOTER_ROLL_OCR_TEST_UNSET_KEY".to_owned(),
            ..VisionConfig::default()
        };
        assert!(VisionExtractor::new(config).is_err());
    }
}
