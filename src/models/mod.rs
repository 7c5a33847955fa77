// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! Data models for the relay.

pub mod credential;
pub mod report;
pub mod snapshot;

pub use credential::Credential;
pub use report::ReportRecord;
pub use snapshot::VehicleSnapshot;
