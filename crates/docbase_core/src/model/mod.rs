//! Entity model mapped onto stored documents.
//!
//! # Responsibility
//! - Define the persistable record contract and the document shape.
//! - Keep serialization pure; persistence lives in `repo`.
//!
//! # Invariants
//! - Every persisted record is identified by a store-assigned `_id`.
//! - Revision tokens stay inside the store boundary.

pub mod document;
pub mod record;
