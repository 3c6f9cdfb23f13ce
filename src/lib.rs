//! Atelier auth service
//!
//! Server-side core of the passwordless, cross-device registration and
//! sign-in flow for the Atelier personal-finance app, plus the thin client
//! handler that bridges an emailed token link into a live session.

pub mod api;
pub mod client;
pub mod clock;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod identity;
pub mod jobs;
pub mod mailer;
pub mod profile;
pub mod rate_limit;
pub mod request;
pub mod server;
pub mod token;
