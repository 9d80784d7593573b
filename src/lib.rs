//! Pub/Sub push receiver that stamps soil sensor readings and streams them
//! into BigQuery.

pub mod api;
pub mod bigquery;
pub mod config;
pub mod handler;
pub mod irrigation;
pub mod pubsub;
pub mod reading;
