//! Prometheus HTTP API query backend

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use super::{QueryApi, QueryResponse, QueryValue, RangeSeries, Sample};
use crate::{Error, Result};

/// Query backend that forwards instant queries to `<url>/api/v1/query`
#[derive(Clone, Debug)]
pub struct PrometheusHttpApi {
    base_url: String,
    client: reqwest::Client,
}

impl PrometheusHttpApi {
    /// Create a backend for the Prometheus server at `base_url`
    ///
    /// `timeout` bounds every individual request.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::query(format!("failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Base URL queries are sent to
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl QueryApi for PrometheusHttpApi {
    async fn query(&self, query: &str, time: DateTime<Utc>) -> Result<QueryResponse> {
        let url = format!("{}/api/v1/query", self.base_url);
        let ts = format!("{:.3}", time.timestamp_millis() as f64 / 1000.0);
        debug!(url = %url, time = %ts, "sending instant query");

        let body = self
            .client
            .get(&url)
            .query(&[("query", query), ("time", ts.as_str())])
            .send()
            .await
            .map_err(|e| Error::query(format!("error querying Prometheus: {}", e)))?
            .text()
            .await
            .map_err(|e| Error::query(format!("error reading Prometheus response: {}", e)))?;

        decode_response(&body)
    }
}

// =============================================================================
// Response Decoding
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<ApiData>,
    #[serde(default)]
    warnings: Vec<String>,
    #[serde(default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiData {
    result_type: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VectorEntry {
    metric: BTreeMap<String, String>,
    value: (serde_json::Value, String),
}

#[derive(Debug, Deserialize)]
struct MatrixEntry {
    metric: BTreeMap<String, String>,
    values: Vec<(f64, String)>,
}

/// Decode a Prometheus API response envelope
///
/// The HTTP status is not inspected. Prometheus answers failed queries with
/// 4xx/5xx and an error envelope, which is decoded like any other body.
pub(crate) fn decode_response(body: &str) -> Result<QueryResponse> {
    let response: ApiResponse = serde_json::from_str(body)
        .map_err(|e| Error::query(format!("invalid Prometheus response: {}", e)))?;

    if response.status != "success" {
        return Err(Error::query(format!(
            "{}: {}",
            response.error_type.as_deref().unwrap_or("error"),
            response.error.as_deref().unwrap_or("unknown error")
        )));
    }

    let data = response
        .data
        .ok_or_else(|| Error::query("Prometheus response is missing data"))?;

    let value = match data.result_type.as_str() {
        "vector" => {
            let entries: Vec<VectorEntry> = from_result(data.result)?;
            QueryValue::Vector(
                entries
                    .into_iter()
                    .map(|e| {
                        Ok(Sample {
                            labels: e.metric,
                            value: parse_value(&e.value.1)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            )
        }
        "matrix" => {
            let entries: Vec<MatrixEntry> = from_result(data.result)?;
            QueryValue::Matrix(
                entries
                    .into_iter()
                    .map(|e| {
                        let points = e
                            .values
                            .iter()
                            .map(|(ts, v)| Ok((*ts, parse_value(v)?)))
                            .collect::<Result<Vec<_>>>()?;
                        Ok(RangeSeries {
                            labels: e.metric,
                            points,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            )
        }
        "scalar" => {
            let (_, v): (serde_json::Value, String) = from_result(data.result)?;
            QueryValue::Scalar(parse_value(&v)?)
        }
        "string" => {
            let (_, v): (serde_json::Value, String) = from_result(data.result)?;
            QueryValue::String(v)
        }
        other => return Err(Error::unsupported_result(other)),
    };

    Ok(QueryResponse {
        value,
        warnings: response.warnings,
    })
}

fn from_result<T: serde::de::DeserializeOwned>(result: serde_json::Value) -> Result<T> {
    serde_json::from_value(result)
        .map_err(|e| Error::query(format!("invalid Prometheus result: {}", e)))
}

fn parse_value(raw: &str) -> Result<f64> {
    // Prometheus encodes special floats as strings
    match raw {
        "+Inf" | "Inf" => Ok(f64::INFINITY),
        "-Inf" => Ok(f64::NEG_INFINITY),
        "NaN" => Ok(f64::NAN),
        _ => raw
            .parse()
            .map_err(|e| Error::query(format!("invalid sample value '{}': {}", raw, e))),
    }
}
