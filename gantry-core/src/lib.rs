//! Shared types and client-less behavior for the gantry aggregation gateway.
//!
//! This crate holds the vocabulary the runtime crate operates on: schema
//! records as discovered from an apiserver, authorization access sets,
//! aggregate count records, object summaries and relationships, and the
//! cell/duration grammar used by object transforms.

pub mod access;
pub use access::{Access, AccessList, AccessSet};

pub mod counts;
pub use counts::{Count, ItemCount};

pub mod duration;

mod error;
pub use error::{Error, Result};

pub mod schema;
pub use schema::{Column, Schema};

pub mod summary;
pub use summary::{Relationship, Summary, SummaryCache};

pub mod user;
pub use user::UserInfo;
