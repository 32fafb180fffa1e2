//! Crashcore - provably-fair crash round server.
//!
//! Core of a repeating crash wagering game: a commitment/reveal seed chain,
//! a deterministic round engine with an exact two-decimal multiplier curve,
//! a settlement coordinator that reconciles round outcomes with an external
//! ledger (retries, idempotency keys, compensating rollback), and a
//! scheduler that drives the wall-clock round cycle. An HTTP/WebSocket
//! surface exposes round state, player actions, and fairness verification.

pub mod api;
pub mod config;
pub mod errors;
pub mod events;
pub mod round;
pub mod scheduler;
pub mod settlement;

pub use config::CrashcoreConfig;
pub use errors::EngineError;
pub use events::{EventBus, GameEvent};
pub use round::engine::CrashRoundEngine;
pub use scheduler::RoundScheduler;
pub use settlement::coordinator::SettlementCoordinator;
pub use settlement::ledger::{HttpLedgerClient, LedgerService};
