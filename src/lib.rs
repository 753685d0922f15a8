//! Tutorboard: real-time collaborative whiteboard session server.
//!
//! SYSTEM CONTEXT
//! ==============
//! Clients attach to a tutoring session over three websocket classes:
//! `tutor` (chat and AI streaming), `whiteboard` (durable canvas actions
//! and opaque document-sync frames), and `ephemeral` (time-boxed
//! annotations). The server authenticates each upgrade, multiplexes
//! connections per session, sequences accepted action batches into a
//! replayable snapshot log, and garbage-collects expired annotations.

pub mod canvas;
pub mod config;
pub mod db;
pub mod frame;
pub mod llm;
pub mod routes;
pub mod services;
pub mod state;
