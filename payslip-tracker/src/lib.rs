//! # payslip-tracker
//!
//! Tracks incomes and savings goals per contact. Exposes the data over a
//! REST API documented with OpenAPI, and over GraphQL. Logins are held by an
//! external identity provider; the API issues its own bearer tokens.

pub mod account;
pub mod auth;
pub mod config;
pub mod database;
pub mod graphql;
pub mod migration;
pub mod routes;
pub mod tracker;

pub use config::Config;
pub use routes::{AppState, build_app, entity_registry};
