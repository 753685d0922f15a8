//! Domain services used by websocket and HTTP routes.
//!
//! ARCHITECTURE
//! ============
//! Service modules own session state, persistence, and fan-out so route
//! handlers stay focused on protocol translation and auth plumbing.

pub mod auth;
pub mod canvas;
pub mod durable;
pub mod ephemeral;
pub mod heartbeat;
pub mod registry;
pub mod session;
pub mod snapshot;
pub mod transcript;
pub mod tutor;
