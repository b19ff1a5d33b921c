//! HTTP surfaces for the failover JSON-RPC gateway.
//!
//! Two listeners: the gateway itself (every `POST` is forwarded through the
//! dispatcher) and the metrics listener (`/healthz`, `/metrics`). The binary
//! in `main.rs` wires both to the engine in `gateway-core` and owns process
//! lifecycle.

pub mod router;
