//! Mock servers for integration testing
//!
//! Stand-ins for the remote streaming service so the HTTP client and the
//! recovery flow can run end to end without network access.

pub mod remote;

pub use remote::{MockPlayback, MockRemoteServer};
