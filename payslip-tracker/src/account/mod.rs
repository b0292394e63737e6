//! Contacts, their configuration, and application logins.

pub mod contact;
pub mod contact_config;
pub mod graphql;
pub mod routes;
pub mod user;
