//! Parley API Library Crate
//!
//! All the logic for the conversation web service: application state,
//! configuration, the Postgres store, REST handlers, the WebSocket turn
//! pipeline and routing. The binaries are thin wrappers around this
//! library.

pub mod config;
pub mod db;
pub mod handlers;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;
