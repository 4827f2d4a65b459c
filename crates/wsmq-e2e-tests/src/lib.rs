//! End-to-end integration tests for wsmq.
//!
//! These tests exercise the full stack:
//! - Gateway server startup and shutdown
//! - WebSocket clients issuing `sub` / `pub` commands
//! - Broker deliveries relayed to subscribed sessions
//! - Session teardown on protocol, broker, and timeout failures
//! - Shared-mode broadcast through the hub

#![cfg(test)]
