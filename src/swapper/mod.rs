//! Model swapper core
//!
//! Multiplexes an unbounded population of per-metric models onto a fixed pool
//! of execution slots. Each slot is owned by an independent actor running as
//! its own tokio task, communicating only via channels.
//!
//! ## Architecture Overview
//!
//! ```text
//!                  ┌───────────────────────┐
//!                  │ ModelSchedulerService │
//!                  └───────────┬───────────┘
//!                              │ owns, drives
//!                  ┌───────────▼───────────┐
//!         bus ────▶│    SwapController     │◀─── request_stop_ts()
//!     (requests)   └───────────┬───────────┘
//!                              │ one mailbox per slot
//!           ┌──────────────────┼──────────────────┐
//!           │                  │                  │
//!   ┌───────▼───────┐  ┌───────▼───────┐  ┌───────▼───────┐
//!   │ SlotAgent 0   │  │ SlotAgent 1   │  │ SlotAgent N   │
//!   └───────┬───────┘  └───────┬───────┘  └───────┬───────┘
//!           │ spawns, stops    │                  │
//!   ┌───────▼───────┐  ┌───────▼───────┐  ┌───────▼───────┐
//!   │ model runner  │  │ model runner  │  │ model runner  │
//!   │ (OS process)  │  │ (OS process)  │  │ (OS process)  │
//!   └───────────────┘  └───────────────┘  └───────────────┘
//! ```
//!
//! ## Invariants
//!
//! 1. **Single writer per slot**: all per-slot model state is mutated only by
//!    that slot's agent task, one mailbox command at a time.
//! 2. **Two-phase hand-off**: a finished model's slot accepts no new model
//!    until the owner acknowledges via `release_slot()`.
//! 3. **Fail loud**: a panic in any scheduler task tears the whole process
//!    down with a reserved exit code; there is no partially-stopped state.

pub mod controller;
pub mod error;
pub mod messages;
pub mod runner;
pub mod slot_agent;
