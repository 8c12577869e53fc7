//! Persisted domain status: the `<job>` element and the stores that keep it.

mod element;
pub mod job;
mod store;

pub use element::StatusElement;
pub use job::{format_job, format_status, parse_job, parse_status};
pub use store::{InMemoryStatusStore, StatusDirStore, StatusStore};
