// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! NIU-Relay: forward NIU scooter telemetry to Traccar
//!
//! This crate polls the NIU cloud API for each vehicle on an account,
//! converts positions from GCJ-02 to WGS-84, and delivers status
//! reports to a Traccar ingestion endpoint with at-least-once retries.

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod time_utils;
