//! Types shared by the metron agent and collector.
//!
//! [`types::Metric`] is the JSON wire record, [`proto`] holds the generated
//! gRPC types, and [`retry`] / [`task`] provide the backoff and periodic task
//! helpers both sides build their background work on.

pub mod retry;
pub mod task;
pub mod types;

pub mod proto {
    #![allow(clippy::pedantic)]
    #![allow(clippy::missing_errors_doc)]
    #![allow(clippy::doc_markdown)]
    #![allow(clippy::default_trait_access)]
    tonic::include_proto!("metron");
}
