//! Incomes and savings goals recorded against a contact.

pub mod goal;
pub mod graphql;
pub mod income;
pub mod routes;

/// Longest income or goal description, in characters.
pub const MAX_DESCRIPTION_LENGTH: usize = 500;
