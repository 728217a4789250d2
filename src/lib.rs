//! # Social Selling Library
//!
//! Inbound side of the Instagram inbox: webhook signature verification,
//! idempotent ingestion of messages, reads and reactions, and the SQL file
//! migration runner that manages the schema.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod ingest;
pub mod migrator;
pub mod models;
pub mod repositories;
pub mod server;
pub mod telemetry;
pub mod webhook_verification;
