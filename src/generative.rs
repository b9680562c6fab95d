//! Client for the generative image model behind the `generative_transform`
//! strategy.
//!
//! The source image is sent inline (base64 with its mime type) next to a
//! fixed instruction, and the first image part of the answer is the artifact.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    config::{parse_url, Config, ConfigError},
    errors::RetrievalError,
    gateway::RetrievalResult,
    scrape::{self, ScrapeSession},
};

const SERVICE: &str = "generative model";

/// Used when the image response has no `Content-Type` and the bytes are not
/// recognizable.
const FALLBACK_IMAGE_MIME: &str = "image/jpeg";

/// Instruction sent with every image. Not configurable.
pub const ENHANCE_PROMPT: &str = "Ubah background foto ini menjadi super realistik HD sore hari langit tajam refleksi cahaya matahari HD sore hari. Jangan ubah apapun dari objek utama di depan (misalnya orang, hewan, atau benda). Tingkatkan kualitas foto jadi HD: buat lebih tajam, detail, dan bersih, tapi tetap alami dan realistis.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    /// Base64 payload
    pub data: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<&'static str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

impl GenerateResponse {
    /// First inline part of the first candidate whose mime type is an image.
    pub fn first_image(&self) -> Option<&InlineData> {
        self.candidates
            .first()?
            .content
            .as_ref()?
            .parts
            .iter()
            .filter_map(|part| part.inline_data.as_ref())
            .find(|data| data.mime_type.starts_with("image/"))
    }
}

pub struct GenerativeClient {
    client: reqwest::Client,
    endpoint: Url,
    api_key: String,
    max_artifact_bytes: u64,
}

impl GenerativeClient {
    pub fn new(client: reqwest::Client, config: &Config) -> Result<Self, ConfigError> {
        let endpoint = format!(
            "{}/models/{}:generateContent",
            config.generative.api_base.trim_end_matches('/'),
            config.generative.model
        );

        Ok(Self {
            client,
            endpoint: parse_url("generative.model", &endpoint)?,
            api_key: config.gemini_api_key.clone(),
            max_artifact_bytes: config.max_artifact_bytes,
        })
    }

    pub async fn transform(
        &self,
        source: &Url,
        session: &mut ScrapeSession,
    ) -> Result<RetrievalResult, RetrievalError> {
        let image = scrape::fetch_binary(&self.client, source, self.max_artifact_bytes).await;
        session.record(
            format!("GET {source}"),
            image.as_ref().ok().map(|i| i.status),
            None,
        );
        let image = image?;

        let mime_type = image
            .content_type
            .or_else(|| infer::get(&image.bytes).map(|kind| kind.mime_type().to_string()))
            .unwrap_or_else(|| FALLBACK_IMAGE_MIME.to_string());

        let request = GenerateRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![
                    Part {
                        text: Some(ENHANCE_PROMPT.to_string()),
                        inline_data: None,
                    },
                    Part {
                        text: None,
                        inline_data: Some(InlineData {
                            mime_type,
                            data: STANDARD.encode(&image.bytes),
                        }),
                    },
                ],
            }],
            generation_config: GenerationConfig {
                response_modalities: vec!["TEXT", "IMAGE"],
            },
        };

        let resp = self
            .client
            .post(self.endpoint.clone())
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|err| RetrievalError::from_upstream(SERVICE, err))?;

        let status = resp.status();
        session.record(format!("POST {}", self.endpoint), Some(status.as_u16()), None);

        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            log::error!("{SERVICE} answered with status {status}: {body}");
            return Err(RetrievalError::ExtractionFailed {
                message: format!("{SERVICE} answered with status {status}"),
                upstream_status: Some(status.as_u16()),
            });
        }

        let response: GenerateResponse = resp.json().await.map_err(|err| {
            RetrievalError::extraction(format!("unreadable {SERVICE} response: {err}"))
        })?;

        let image = response.first_image().ok_or(RetrievalError::ModelResponseEmpty)?;
        let bytes = STANDARD.decode(image.data.trim()).map_err(|err| {
            RetrievalError::extraction(format!("{SERVICE} returned invalid base64: {err}"))
        })?;
        if bytes.is_empty() {
            return Err(RetrievalError::ModelResponseEmpty);
        }
        session.extracted(&image.mime_type);

        Ok(RetrievalResult::from_bytes(&bytes, image.mime_type.clone(), source))
    }
}
