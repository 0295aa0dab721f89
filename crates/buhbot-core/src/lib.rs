//! `buhbot-core` — shared types, configuration, error, and working-hours
//! arithmetic for the SLA engine.
//!
//! # Overview
//!
//! This crate has no I/O of its own. [`clock`] computes working-hours
//! arithmetic in a chat's configured timezone; [`types`] defines the
//! persisted entities (Chat, Request, Alert, GlobalSettings, ...) shared by
//! every other crate in the workspace; [`config`] loads and validates process
//! configuration at boot.

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use error::{CoreError, Result};
