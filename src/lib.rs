// ABOUTME: Root library module exposing process-wiring code to the binary entrypoint
// ABOUTME: Pure logic lives in termbot-core; this crate holds tokio/process-bound adapters

pub mod dispatcher;
pub mod edit;
pub mod locks;
pub mod logging;
pub mod scheduler;
pub mod terminal;
pub mod transport;
