//! Domain error taxonomy for round operations.
//!
//! Validation failures are synchronous and side-effect free, so callers can
//! always retry them. Ledger and settlement failures live next to the code
//! that produces them in the `settlement` module.

use crate::round::types::RoundStatus;
use thiserror::Error;

/// Errors raised by the round engine's own operations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error("no active round")]
    NoActiveRound,

    #[error("round is {actual}, operation requires {expected}")]
    WrongPhase {
        expected: RoundStatus,
        actual: RoundStatus,
    },

    #[error("player {0} already has a bet in this round")]
    DuplicateBet(String),

    #[error("no bet found for player {0}")]
    NoBetFound(String),

    #[error("player {0} has already cashed out")]
    AlreadyCashedOut(String),

    #[error("bet amount {amount:.2} outside allowed range [{min:.2}, {max:.2}]")]
    BetOutOfBounds { amount: f64, min: f64, max: f64 },

    #[error("invalid bet amount: {0}")]
    InvalidAmount(f64),

    #[error("a round is already in progress")]
    RoundInProgress,

    #[error(transparent)]
    SeedChain(#[from] SeedChainError),
}

/// Errors raised by the commitment seed chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeedChainError {
    #[error("seed chain exhausted after {consumed} rounds; a fresh chain with a fresh commitment is required")]
    Exhausted { consumed: usize },

    #[error("seed chain length must be greater than zero")]
    EmptyChain,
}
