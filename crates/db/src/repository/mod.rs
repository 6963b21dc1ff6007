//! Repository functions: one function per database operation.
//!
//! Every function takes a `&DbPool` and returns a `Result<T, DbError>`.
//! Queries are checked at runtime (`query_as` + `bind`), so building the
//! crate needs no live database.

pub mod executions;
pub mod workflows;
