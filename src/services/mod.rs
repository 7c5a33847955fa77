// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - the relay pipeline.

pub mod credentials;
pub mod datum;
pub mod delivery;
pub mod niu;
pub mod report_loop;
pub mod supervisor;

pub use credentials::{AuthApi, CredentialManager, CredentialState};
pub use delivery::{DeliveryOutcome, DeliveryQueue, DeliveryService, ReportTransport};
pub use niu::{NiuClient, SnapshotFetch, TelemetrySource};
pub use report_loop::{ReportLoop, ReportPolicy, TickOutcome};
pub use supervisor::FleetSupervisor;
