// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Vehicle telemetry snapshot as reported by the NIU API.

/// One poll result for one vehicle.
///
/// Every field is optional because the upstream omits whatever it does
/// not currently know; consumers must tolerate any of them missing.
/// Coordinates are GCJ-02.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VehicleSnapshot {
    pub vehicle_id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Fix time in epoch milliseconds
    pub fix_timestamp_ms: Option<i64>,
    /// Ground speed in km/h
    pub speed: Option<f64>,
    /// Battery charge, percent
    pub battery_level: Option<f64>,
    pub satellites: Option<i64>,
    pub signal_strength: Option<i64>,
    pub hdop: Option<f64>,
    pub ignition: Option<bool>,
    pub charging: Option<bool>,
}

impl VehicleSnapshot {
    /// GCJ-02 position, if the snapshot carries both coordinates.
    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.latitude?, self.longitude?))
    }

    /// Speed in km/h, treating an unknown speed as stationary.
    pub fn speed_or_zero(&self) -> f64 {
        self.speed.unwrap_or(0.0)
    }
}
