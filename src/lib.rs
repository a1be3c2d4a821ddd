#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Collects deduplicated GitHub activity from webhook deliveries and the REST API
//! under a shared rate-limit budget.
//!
//! # Module Organization
//!
//! - [`web`]: retry rules, the quota-aware rate limiter, the HTTP client wrapper and pagination
//! - [`collect`]: the recursive, paginated collection engine
//! - [`cache`]: versioned key-value caches and the entities stored in them
//! - [`dedup`]: content hashing that makes webhook and timeline payloads comparable
//! - [`processors`]: webhook ingestion, timeline reconciliation, onboarding, point and traffic collection
//! - [`config`]: runtime configuration
//! - [`auth`], [`io`]: collaborator contracts (credentials, record sinks, telemetry, queues)

pub type Result<T, E = ohno::AppError> = core::result::Result<T, E>;

mod outcome;

pub mod auth;
pub mod cache;
pub mod collect;
pub mod config;
pub mod dedup;
pub mod io;
pub mod model;
pub mod processors;
pub mod web;

pub use outcome::Outcome;
