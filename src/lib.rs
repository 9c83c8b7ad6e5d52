//! shortgate - short link access gateway
//!
//! Every visit to a short link passes through a policy pipeline before the
//! visitor reaches the destination: device fingerprinting, risk scoring,
//! a gate chain (lifecycle, blocklist, country, user-agent, visit limits)
//! and an access-mode state machine (redirect, password, warning, iframe, proxy).
//!
//! # Architecture
//! - `policy`: fingerprint, risk, gates, anomaly detection, dispatch, pipeline
//! - `storage`: key-value policy store backends and link record models
//! - `services`: outbound collaborators (header probe, proxy forwarder, alerts)
//! - `api`: HTTP handlers and middleware
//! - `config`: static configuration
//! - `runtime`: startup wiring and the HTTP server
//! - `system`: logging

pub mod api;
pub mod cli;
pub mod config;
pub mod errors;
pub mod policy;
pub mod runtime;
pub mod services;
pub mod storage;
pub mod system;
pub mod utils;
