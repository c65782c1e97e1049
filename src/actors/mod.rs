//! Actor that drives the monitoring pipeline
//!
//! ## Architecture Overview
//!
//! ```text
//!        MonitorHandle ──(MonitorCommand over mpsc)──┐
//!                                                    ▼
//!   interval tick ──────────────────────────▶ MonitorActor
//!                                                    │ per tick
//!          ┌─────────────────────────────────────────┤
//!          ▼                                         ▼
//!   sensor slots (joined concurrently)         zones, alert policy
//!   pull → window → features → model                 │
//!                                                    ▼
//!                              broadcast channel + registered sinks
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: the actor has an mpsc command channel for control messages
//! 2. **Events**: every reading, alert and warning is published for fan-out
//! 3. **Request/Response**: oneshot channels for status and history queries

pub mod driver;
pub mod messages;
