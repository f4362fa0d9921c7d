//! Clients for the external conversion and analysis services.
//!
//! Conversion takes the scanned image plus the twelve lead boxes and returns
//! per-lead millivolt samples. Analysis takes that record verbatim and
//! returns axis, rhythm and diagnosis probabilities.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::error::TransportError;
use crate::leads::LeadName;
use crate::payload::{ConversionPayload, PatientMetadata};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DigitizedLead {
    pub name: LeadName,
    pub samples: Vec<f64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DigitizedRecord {
    pub record_id: String,
    pub metadata: PatientMetadata,
    pub leads: Vec<DigitizedLead>,
}

/// A conversion response: the typed view plus the body exactly as received,
/// which is what gets forwarded for analysis.
#[derive(Clone, Debug, PartialEq)]
pub struct ConvertedRecord {
    raw: serde_json::Value,
    record: DigitizedRecord,
}

impl ConvertedRecord {
    pub fn parse(raw: serde_json::Value) -> Result<Self, TransportError> {
        let record: DigitizedRecord = serde_json::from_value(raw.clone())
            .map_err(|e| TransportError::Malformed(format!("conversion response: {e}")))?;
        if record.leads.is_empty() {
            return Err(TransportError::Malformed(
                "conversion response has no leads".into(),
            ));
        }
        Ok(Self { raw, record })
    }

    pub fn raw(&self) -> &serde_json::Value {
        &self.raw
    }

    pub fn record(&self) -> &DigitizedRecord {
        &self.record
    }

    pub fn lead(&self, name: LeadName) -> Option<&DigitizedLead> {
        self.record.leads.iter().find(|l| l.name == name)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CardiacAxis {
    /// Frontal plane axis in degrees.
    pub frontal: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub cardiac_axis: CardiacAxis,
    pub rhythm: String,
    pub probabilities: BTreeMap<String, f64>,
}

impl AnalysisResult {
    pub fn parse(raw: serde_json::Value) -> Result<Self, TransportError> {
        let result: Self = serde_json::from_value(raw)
            .map_err(|e| TransportError::Malformed(format!("analysis response: {e}")))?;
        if let Some((label, p)) = result
            .probabilities
            .iter()
            .find(|(_, p)| !(0.0..=1.0).contains(*p))
        {
            return Err(TransportError::Malformed(format!(
                "probability for {label} out of range: {p}"
            )));
        }
        Ok(result)
    }

    /// Diagnoses by descending probability.
    pub fn ranked(&self) -> Vec<(&str, f64)> {
        let mut ranked: Vec<(&str, f64)> = self
            .probabilities
            .iter()
            .map(|(label, p)| (label.as_str(), *p))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
    }
}

#[async_trait]
pub trait EcgServices: Send + Sync {
    async fn convert(&self, payload: &ConversionPayload) -> Result<ConvertedRecord, TransportError>;

    async fn analyze(&self, record: &ConvertedRecord) -> Result<AnalysisResult, TransportError>;
}

/// HTTP implementation of [`EcgServices`].
pub struct HttpEcgServices {
    client: reqwest::Client,
    conversion_url: String,
    analysis_url: String,
}

impl HttpEcgServices {
    pub fn new(config: &AppConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            conversion_url: config.conversion_url.clone(),
            analysis_url: config.analysis_url.clone(),
        })
    }

    async fn read_json(response: reqwest::Response) -> Result<serde_json::Value, TransportError> {
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body).map_err(|e| TransportError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl EcgServices for HttpEcgServices {
    async fn convert(&self, payload: &ConversionPayload) -> Result<ConvertedRecord, TransportError> {
        let body = serde_json::to_string(&payload.request_body())
            .map_err(|e| TransportError::Malformed(e.to_string()))?;
        let image = payload.image();
        let part = Part::bytes(image.bytes().to_vec())
            .file_name(image.file_name().to_string())
            .mime_str(image.mime_type())?;
        let form = Form::new().text("payload", body).part("image", part);

        let response = self
            .client
            .post(&self.conversion_url)
            .multipart(form)
            .send()
            .await?;
        ConvertedRecord::parse(Self::read_json(response).await?)
    }

    async fn analyze(&self, record: &ConvertedRecord) -> Result<AnalysisResult, TransportError> {
        let body = serde_json::json!({ "digitizedRecord": record.raw() });
        let response = self
            .client
            .post(&self.analysis_url)
            .json(&body)
            .send()
            .await?;
        AnalysisResult::parse(Self::read_json(response).await?)
    }
}
