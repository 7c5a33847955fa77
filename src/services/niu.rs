// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! NIU cloud API client.
//!
//! Handles:
//! - Password login and refresh-token exchange
//! - Lightweight token validation
//! - Vehicle roster lookup
//! - Per-vehicle telemetry snapshots
//!
//! The API answers with an envelope `{"status", "desc", "data"}`;
//! numeric fields inside `data` arrive either as JSON numbers or as
//! numeric strings depending on firmware, so they are parsed leniently.

use crate::error::{AppError, Result};
use crate::models::{Credential, VehicleSnapshot};
use crate::services::credentials::AuthApi;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Timeout for every NIU API call.
pub const NIU_TIMEOUT: Duration = Duration::from_secs(10);

/// Application id the token endpoint expects from the mobile app.
const NIU_APP_ID: &str = "niu_ktdrr960";

const USER_AGENT: &str = "manager/5.13.6 (iPhone; iOS 17.0; Scale/3.00);lang=en-US;ostype=iOS";

/// Outcome of one telemetry poll.
///
/// Only `Ready` carries data; the other cases are normal "try again next
/// cycle" signals, not faults.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotFetch {
    Ready(VehicleSnapshot),
    /// Network failure, missing payload or vehicle offline.
    NotReady,
    /// The upstream rejected the bearer token.
    Unauthorized,
}

/// Upstream telemetry provider as seen by the report loops.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Serial numbers of every vehicle on the account.
    async fn list_vehicles(&self, access_token: &str) -> Result<Vec<String>>;

    /// Current snapshot for one vehicle. Never retries internally.
    async fn fetch_snapshot(&self, access_token: &str, vehicle_id: &str) -> SnapshotFetch;
}

/// NIU API client.
#[derive(Clone)]
pub struct NiuClient {
    http: reqwest::Client,
    api_url: String,
    account_url: String,
}

impl NiuClient {
    /// Create a client against the given API and account endpoints.
    pub fn new(api_url: &str, account_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(NIU_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AppError::Internal(anyhow::anyhow!("HTTP client error: {}", e)))?;

        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            account_url: account_url.trim_end_matches('/').to_string(),
        })
    }

    /// POST to the token endpoint and parse the issued credential.
    async fn token_request(&self, form: &[(&str, &str)]) -> Result<Credential> {
        let url = format!("{}/v3/api/oauth2/token", self.account_url);

        let response = self
            .http
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(|e| AppError::Auth(format!("Token request failed: {}", e)))?;

        let envelope: Envelope = check_response_json(response)
            .await
            .map_err(|e| AppError::Auth(e.to_string()))?;

        parse_credential(envelope)
    }

    /// Authenticated GET returning the envelope.
    async fn get_envelope(
        &self,
        path: &str,
        access_token: &str,
        query: &[(&str, &str)],
    ) -> Result<Envelope> {
        let url = format!("{}{}", self.api_url, path);

        let response = self
            .http
            .get(&url)
            .header("token", access_token)
            .header("accept", "application/json")
            .query(query)
            .send()
            .await
            .map_err(|e| AppError::Upstream(e.to_string()))?;

        let envelope: Envelope = check_response_json(response).await?;
        if envelope.is_token_rejection() {
            return Err(AppError::Upstream(AppError::NIU_TOKEN_ERROR.to_string()));
        }
        Ok(envelope)
    }
}

#[async_trait]
impl AuthApi for NiuClient {
    async fn login(&self, account: &str, password_md5: &str) -> Result<Credential> {
        self.token_request(&[
            ("account", account),
            ("password", password_md5),
            ("grant_type", "password"),
            ("scope", "base"),
            ("app_id", NIU_APP_ID),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<Credential> {
        self.token_request(&[
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
            ("scope", "base"),
            ("app_id", NIU_APP_ID),
        ])
        .await
    }

    async fn validate(&self, access_token: &str) -> Result<bool> {
        match self.get_envelope("/v5/scooter/list", access_token, &[]).await {
            Ok(envelope) => Ok(envelope.has_data()),
            Err(e) if e.is_token_error() => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl TelemetrySource for NiuClient {
    async fn list_vehicles(&self, access_token: &str) -> Result<Vec<String>> {
        let envelope = self.get_envelope("/v5/scooter/list", access_token, &[]).await?;
        Ok(parse_vehicle_list(envelope.data.as_ref()))
    }

    async fn fetch_snapshot(&self, access_token: &str, vehicle_id: &str) -> SnapshotFetch {
        let result = self
            .get_envelope(
                "/v5/scooter/motor_data/index_info",
                access_token,
                &[("sn", vehicle_id)],
            )
            .await;

        match result {
            Ok(envelope) => parse_snapshot(vehicle_id, envelope),
            Err(e) if e.is_token_error() => {
                tracing::warn!(vehicle_id, "NIU rejected access token");
                SnapshotFetch::Unauthorized
            }
            Err(e) => {
                tracing::warn!(vehicle_id, error = %e, "NIU telemetry call failed");
                SnapshotFetch::NotReady
            }
        }
    }
}

/// Check response status and parse the JSON body.
async fn check_response_json<T: for<'de> Deserialize<'de>>(
    response: reqwest::Response,
) -> Result<T> {
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(AppError::Upstream(AppError::NIU_TOKEN_ERROR.to_string()));
        }

        if status.as_u16() == 429 {
            tracing::warn!("NIU rate limit hit (429)");
        }

        return Err(AppError::Upstream(format!(
            "HTTP {}: {}",
            status,
            truncate(&body, 200)
        )));
    }

    response
        .json()
        .await
        .map_err(|e| AppError::Upstream(format!("JSON parse error: {}", e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire format
// ─────────────────────────────────────────────────────────────────────────────

/// Response envelope shared by every NIU endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct Envelope {
    #[serde(default)]
    status: Option<Value>,
    #[serde(default)]
    desc: Option<String>,
    #[serde(default)]
    data: Option<Value>,
}

impl Envelope {
    fn has_data(&self) -> bool {
        match &self.data {
            None | Some(Value::Null) => false,
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::Array(items)) => !items.is_empty(),
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    /// The API reports an expired token in-band with a non-zero status.
    fn is_token_rejection(&self) -> bool {
        let failed = self
            .status
            .as_ref()
            .and_then(value_i64)
            .is_some_and(|status| status != 0);
        let mentions_token = self
            .desc
            .as_deref()
            .is_some_and(|desc| desc.to_ascii_lowercase().contains("token"));
        failed && mentions_token && !self.has_data()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IndexInfo {
    // Upstream spelling.
    #[serde(rename = "postion", alias = "position")]
    position: Option<Position>,
    gps_timestamp: Option<Value>,
    now_speed: Option<Value>,
    batteries: Option<Batteries>,
    gps: Option<Value>,
    gsm: Option<Value>,
    hdop: Option<Value>,
    is_acc_on: Option<Value>,
    is_charging: Option<Value>,
    is_connected: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct Position {
    lat: Option<Value>,
    lng: Option<Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Batteries {
    compartment_a: Option<Compartment>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Compartment {
    battery_charging: Option<Value>,
}

fn parse_credential(envelope: Envelope) -> Result<Credential> {
    let data = envelope
        .data
        .filter(|d| d.is_object())
        .ok_or_else(|| {
            AppError::Auth(format!(
                "Token endpoint returned no data: {}",
                envelope.desc.unwrap_or_default()
            ))
        })?;

    let token = data.get("token").cloned().unwrap_or(data);
    let field = |key: &str| token.get(key);

    let credential = Credential {
        access_token: field("access_token")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        refresh_token: field("refresh_token")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        access_expires_at: field("token_expires_in").and_then(value_i64).unwrap_or(0),
        refresh_expires_at: field("refresh_token_expires_in")
            .and_then(value_i64)
            .unwrap_or(0),
    };

    if credential.access_token.is_empty() {
        return Err(AppError::Auth("Token endpoint returned no access token".to_string()));
    }
    Ok(credential)
}

pub(crate) fn parse_snapshot(vehicle_id: &str, envelope: Envelope) -> SnapshotFetch {
    if !envelope.has_data() {
        tracing::info!(
            vehicle_id,
            desc = envelope.desc.as_deref().unwrap_or(""),
            "NIU response carried no data"
        );
        return SnapshotFetch::NotReady;
    }

    let parsed = envelope
        .data
        .map(serde_json::from_value::<IndexInfo>)
        .transpose();
    let info = match parsed {
        Ok(Some(info)) => info,
        Ok(None) => return SnapshotFetch::NotReady,
        Err(e) => {
            tracing::warn!(vehicle_id, error = %e, "Unexpected NIU telemetry payload");
            return SnapshotFetch::NotReady;
        }
    };

    let connected = info.is_connected.as_ref().and_then(value_bool).unwrap_or(false);
    if !connected {
        tracing::debug!(vehicle_id, "Vehicle not connected");
        return SnapshotFetch::NotReady;
    }

    let position = info.position.unwrap_or_default();
    let battery_level = info
        .batteries
        .and_then(|b| b.compartment_a)
        .and_then(|c| c.battery_charging)
        .as_ref()
        .and_then(value_f64);

    SnapshotFetch::Ready(VehicleSnapshot {
        vehicle_id: vehicle_id.to_string(),
        latitude: position.lat.as_ref().and_then(value_f64),
        longitude: position.lng.as_ref().and_then(value_f64),
        fix_timestamp_ms: info.gps_timestamp.as_ref().and_then(value_i64),
        speed: info.now_speed.as_ref().and_then(value_f64),
        battery_level,
        satellites: info.gps.as_ref().and_then(value_i64),
        signal_strength: info.gsm.as_ref().and_then(value_i64),
        hdop: info.hdop.as_ref().and_then(value_f64),
        ignition: info.is_acc_on.as_ref().and_then(value_bool),
        charging: info.is_charging.as_ref().and_then(value_bool),
    })
}

fn parse_vehicle_list(data: Option<&Value>) -> Vec<String> {
    let items = match data {
        Some(Value::Array(items)) => items,
        Some(Value::Object(map)) => match map.get("items") {
            Some(Value::Array(items)) => items,
            _ => return vec![],
        },
        _ => return vec![],
    };

    items
        .iter()
        .filter_map(|item| item.get("sn_id").or_else(|| item.get("sn")))
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect()
}

fn value_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }
}

fn value_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Some(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Some(false),
        Value::Number(_) | Value::String(_) => value_i64(value).map(|v| v == 1),
        _ => None,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.trim().chars().take(max_chars).collect()
}
