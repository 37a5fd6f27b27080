//! The metron collector: receives metric updates over HTTP and gRPC and
//! serves them back from a pluggable [`metron_storage::Storage`] backend.

pub mod api;
pub mod app;
pub mod config;
pub mod grpc;
pub mod logging;
pub mod middleware;
pub mod state;
pub mod storage;
pub mod subnet;
