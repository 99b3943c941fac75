//! Core data model types for conveyor.
//!
//! This module contains the values that travel through a pipeline:
//! - Stage outcomes and parcel content
//! - The parcel envelope with its sequence number
//! - The run-scoped shared cache

mod cache;
mod outcome;
mod parcel;

pub use cache::Cache;
pub use outcome::{Content, Outcome, Payload};
pub use parcel::{Parcel, ParcelLogger};
