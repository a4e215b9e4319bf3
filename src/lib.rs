//! # Outpost
//!
//! Multi-tenant messaging and commerce backend. Each tenant and each customer
//! conversation is a single-writer actor over its own embedded store; a small
//! global store holds the storefront registry and the membership table.

mod macros;

pub mod actor;
pub mod auth;
pub mod clock;
pub mod config;
pub mod conversation;
pub mod crypto;
pub mod db;
pub mod error;
pub mod handlers;
pub mod launch;
pub mod mail;
pub mod messaging;
pub mod models;
pub mod normalization;
pub mod platform;
pub mod repositories;
pub mod server;
pub mod session;
pub mod storefront;
pub mod telemetry;
pub mod tenant;
pub use migration;
