//! # docflow
//!
//! Orchestration substrate for a distributed document-processing pipeline:
//! a request enters as a single file submission and is split, OCR'd,
//! classified into documents, extracted, and consolidated into a single
//! result, with low-confidence machine decisions diverted to a human
//! operator and an SLA monitor watching every request's deadline.
//!
//! The substrate itself runs no OCR, classification, or extraction model —
//! those stages are stubs (spec non-goal). What this crate provides is the
//! message envelope, broker topology, routing resolver, stage worker
//! runtime, fan-in aggregation, and the persisted request/page/document/
//! aggregation state machine those stubs plug into.
//!
//! ## Architecture
//!
//! Every stage is a `StageHandler` consuming from one queue: deserialize,
//! open a Postgres transaction, run stage logic, commit, publish outgoing
//! messages, ack. Commit strictly precedes publish — the load-bearing
//! correctness property documented in [`runtime`].

pub mod backoffice_http;
pub mod broker;
pub mod config;
pub mod domain_types;
pub mod envelope;
pub mod error;
pub mod ingress_http;
pub mod lifecycle;
pub mod observability;
pub mod routing;
pub mod runtime;
pub mod server;
pub mod sla_monitor;
pub mod storage;
pub mod time_provider;
pub mod utils;
pub mod workflow;

pub use crate::error::DocflowError;

// Common imports mirrored at the crate root for binaries and tests.
pub use ::tracing::{debug, error, info, instrument, warn};
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use std::time::Duration;
pub use thiserror::Error;
pub use uuid::Uuid;
