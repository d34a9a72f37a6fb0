//! Repository layer over the document store handle.
//!
//! # Responsibility
//! - Expose create/update/delete and lookup operations per record type.
//! - Keep store protocol details and retry handling out of callers.
//!
//! # Invariants
//! - Every store call runs under the handle's retry policy.
//! - Validation errors are returned before any remote call.

mod query;
pub mod record_repo;
