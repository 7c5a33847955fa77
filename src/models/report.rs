// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Outbound status record for the Traccar ingestion endpoint.

use crate::models::VehicleSnapshot;
use crate::time_utils::{format_utc_rfc3339, from_epoch_millis};
use chrono::{DateTime, Utc};

/// Metres per nautical mile, for the knots conversion.
const METRES_PER_NAUTICAL_MILE: f64 = 1852.0;

/// Empirical factor turning HDOP into an accuracy estimate in metres.
const HDOP_ACCURACY_FACTOR: f64 = 5.0;

/// One position report, already converted to WGS-84.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportRecord {
    pub vehicle_id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Time of the fix, not of the poll
    pub timestamp: DateTime<Utc>,
    /// Speed in knots
    pub speed_knots: f64,
    pub battery_level: Option<f64>,
    pub satellites: Option<i64>,
    pub signal_strength: Option<i64>,
    pub hdop: Option<f64>,
    pub ignition: Option<bool>,
    pub charging: Option<bool>,
}

impl ReportRecord {
    /// Build a record from a snapshot and its WGS-84 position.
    ///
    /// `polled_at` stands in for the fix time when the upstream did not
    /// supply one.
    pub fn from_snapshot(
        snapshot: &VehicleSnapshot,
        latitude: f64,
        longitude: f64,
        polled_at: DateTime<Utc>,
    ) -> Self {
        let timestamp = snapshot
            .fix_timestamp_ms
            .and_then(from_epoch_millis)
            .unwrap_or(polled_at);

        Self {
            vehicle_id: snapshot.vehicle_id.clone(),
            latitude: round_to(latitude, 7),
            longitude: round_to(longitude, 7),
            timestamp,
            speed_knots: to_knots(snapshot.speed_or_zero()),
            battery_level: snapshot.battery_level,
            satellites: snapshot.satellites,
            signal_strength: snapshot.signal_strength,
            hdop: snapshot.hdop,
            ignition: snapshot.ignition,
            charging: snapshot.charging,
        }
    }

    /// Derived accuracy estimate in metres.
    pub fn accuracy(&self) -> Option<f64> {
        self.hdop.map(|hdop| (hdop * HDOP_ACCURACY_FACTOR).max(0.0))
    }

    /// Key/value pairs for the form-encoded POST.
    ///
    /// Optional keys are omitted when the source field is absent.
    pub fn to_form(&self) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("id", self.vehicle_id.clone()),
            ("lat", format!("{:.7}", self.latitude)),
            ("lon", format!("{:.7}", self.longitude)),
            ("timestamp", format_utc_rfc3339(self.timestamp)),
            ("speed", format!("{:.2}", self.speed_knots)),
        ];

        if let Some(level) = self.battery_level {
            form.push(("batteryLevel", format!("{:.1}", level)));
        }
        if let Some(sat) = self.satellites {
            form.push(("sat", sat.to_string()));
        }
        if let Some(rssi) = self.signal_strength {
            form.push(("rssi", rssi.to_string()));
        }
        if let (Some(accuracy), Some(hdop)) = (self.accuracy(), self.hdop) {
            form.push(("accuracy", format!("{:.1}", accuracy)));
            form.push(("hdop", format!("{:.2}", hdop)));
        }
        if let Some(ignition) = self.ignition {
            form.push(("ignition", flag(ignition)));
        }
        if let Some(charging) = self.charging {
            form.push(("charge", flag(charging)));
        }

        form
    }
}

/// Convert the upstream speed reading to knots.
///
/// The factor matches what the Traccar deployment has always received,
/// so dashboards built on it keep their scale.
pub fn to_knots(speed: f64) -> f64 {
    speed * 3600.0 / METRES_PER_NAUTICAL_MILE
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn flag(value: bool) -> String {
    if value { "1" } else { "0" }.to_string()
}
