//! The four Dialograph HTTP services (dialogue, parser, graph, suggestion),
//! the downstream pipeline client, and the async ingest worker.

pub mod api;
pub mod auth;
pub mod error;
pub mod pipeline;
pub mod readiness;
pub mod state;
pub mod suggest;
pub mod worker;
