//! Hosted detection service client.
//!
//! Talks to a Roboflow-style REST inference endpoint: the image is uploaded as
//! a base64 body and the service answers with a JSON list of predictions in
//! source-image pixel coordinates.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use base64::Engine;
use serde::Deserialize;
use url::Url;

use crate::detect::backend::{DetectionRequest, DetectionService};
use crate::detect::result::{Detection, ObjectClass};
use crate::images::ImageEntry;

pub const DEFAULT_ENDPOINT: &str = "https://detect.roboflow.com";
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MAX_IMAGE_BYTES: u64 = 64 * 1024 * 1024;

/// Configuration for the hosted detection model.
#[derive(Clone, Debug)]
pub struct RoboflowConfig {
    /// Base inference URL.
    pub endpoint: String,
    /// Project id of the hosted model.
    pub project: String,
    /// Model version within the project.
    pub version: u32,
    /// Per-user API key.
    pub api_key: String,
    pub timeout: Duration,
}

impl Default for RoboflowConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            project: String::new(),
            version: 1,
            api_key: String::new(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

pub struct RoboflowClient {
    agent: ureq::Agent,
    config: RoboflowConfig,
}

impl RoboflowClient {
    pub fn new(config: RoboflowConfig) -> Result<Self> {
        if config.project.trim().is_empty() {
            return Err(anyhow!("roboflow project must be set"));
        }
        if config.api_key.trim().is_empty() {
            return Err(anyhow!(
                "roboflow api key must be set (config detector.api_key or ROBOFLOW_API_KEY)"
            ));
        }
        Url::parse(&config.endpoint)
            .with_context(|| format!("invalid roboflow endpoint '{}'", config.endpoint))?;
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Ok(Self { agent, config })
    }

    fn request_url(&self, request: DetectionRequest) -> Result<Url> {
        let mut url = Url::parse(&self.config.endpoint).context("parse roboflow endpoint")?;
        url.path_segments_mut()
            .map_err(|_| anyhow!("roboflow endpoint cannot carry a path"))?
            .pop_if_empty()
            .push(&self.config.project)
            .push(&self.config.version.to_string());
        url.query_pairs_mut()
            .append_pair("api_key", &self.config.api_key)
            .append_pair("confidence", &request.confidence_floor.to_string())
            .append_pair("overlap", &request.overlap.to_string())
            .append_pair("format", "json");
        Ok(url)
    }
}

impl DetectionService for RoboflowClient {
    fn name(&self) -> &'static str {
        "roboflow"
    }

    fn detect(&self, image: &ImageEntry, request: DetectionRequest) -> Result<Vec<Detection>> {
        let metadata = std::fs::metadata(&image.path)
            .with_context(|| format!("stat image {}", image.path.display()))?;
        if metadata.len() > MAX_IMAGE_BYTES {
            return Err(anyhow!(
                "image {} is {} bytes; upload limit is {}",
                image.path.display(),
                metadata.len(),
                MAX_IMAGE_BYTES
            ));
        }
        let bytes = std::fs::read(&image.path)
            .with_context(|| format!("read image {}", image.path.display()))?;
        let body = base64::engine::general_purpose::STANDARD.encode(bytes);

        let url = self.request_url(request)?;
        log::debug!(
            "roboflow predict image={} overlap={} confidence={}",
            image.id,
            request.overlap,
            request.confidence_floor
        );
        let response = self
            .agent
            .post(url.as_str())
            .set("Content-Type", "application/x-www-form-urlencoded")
            .send_string(&body)
            .map_err(|e| match e {
                ureq::Error::Status(code, _) => {
                    anyhow!("roboflow returned HTTP {} for image {}", code, image.id)
                }
                other => anyhow!("roboflow request failed for image {}: {}", image.id, other),
            })?;
        let text = response
            .into_string()
            .context("read roboflow response body")?;
        parse_predictions(&text)
    }
}

#[derive(Debug, Deserialize)]
struct PredictResponse {
    #[serde(default)]
    predictions: Vec<Prediction>,
}

#[derive(Debug, Deserialize)]
struct Prediction {
    x: f32,
    y: f32,
    width: f32,
    height: f32,
    confidence: f32,
    class: String,
}

/// Parse a prediction payload into detections with `0..=1` confidences.
pub(crate) fn parse_predictions(body: &str) -> Result<Vec<Detection>> {
    let response: PredictResponse =
        serde_json::from_str(body).context("invalid roboflow prediction payload")?;
    response
        .predictions
        .into_iter()
        .map(|p| {
            if !(p.width >= 0.0 && p.height >= 0.0) {
                return Err(anyhow!(
                    "prediction has negative size {}x{}",
                    p.width,
                    p.height
                ));
            }
            Ok(Detection::new(
                ObjectClass::from_label(&p.class),
                normalize_confidence(p.confidence),
                p.x,
                p.y,
                p.width,
                p.height,
            ))
        })
        .collect()
}

/// Scores above 1 are percentages.
fn normalize_confidence(raw: f32) -> f32 {
    if raw > 1.0 {
        (raw / 100.0).min(1.0)
    } else {
        raw.max(0.0)
    }
}
