//! printrelay - print job relay pipeline.
//!
//! Source files stored in a relational table are published to a message
//! broker and pushed through a chain of transforms (highlight, typeset,
//! render, print). Each hop consumes from one queue and publishes to the
//! next inside a broker transaction, so a job is never lost between stages.

pub mod cli;
pub mod config;
pub mod models;
pub mod poller;
pub mod relay;
pub mod repository;
pub mod schema;
pub mod shutdown;
pub mod stages;
pub mod transport;
