//! Settlement coordination between the round engine and the external ledger.
//!
//! Makes each money-moving action look atomic to the caller even though the
//! ledger transport is not:
//! - a bet debits the ledger first and only then registers in the round; if
//!   registration fails, the debit is rolled back with a compensating call
//!   and the registration error is what the caller sees.
//! - a cashout locks in the multiplier first; a failed credit is surfaced
//!   as an unsettled win carrying the full payout detail. It is never
//!   reversed and never blindly re-credited.

use crate::config::{CrashcoreConfig, RoundConfig};
use crate::errors::EngineError;
use crate::events::{EventBus, GameEvent};
use crate::round::engine::CrashRoundEngine;
use crate::round::types::{money, Cashout, Cents, RoundSummary};
use crate::settlement::ledger::{
    CompensateRequest, CreditRequest, DebitRequest, LedgerError, LedgerService,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Terminal disposition of a tracked settlement request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SettlementState {
    InFlight,
    Settled,
    Failed,
    AwaitingReconciliation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementKind {
    Bet,
    Win,
    Rollback,
}

/// One logical ledger operation, stable across its retries.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingSettlement {
    pub request_id: String,
    pub kind: SettlementKind,
    pub round_id: String,
    pub player_id: String,
    pub amount: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_transaction_id: Option<String>,
    pub state: SettlementState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fully settled bet returned to the caller.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedBet {
    pub round_id: String,
    pub player_id: String,
    pub amount: f64,
    pub transaction_id: String,
    pub new_balance: f64,
}

/// Result of a cashout: either fully credited, or locked in but awaiting
/// out-of-band reconciliation with the ledger.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum CashoutOutcome {
    Settled {
        round_id: String,
        cashout: Cashout,
        transaction_id: String,
        new_balance: f64,
    },
    Unsettled {
        round_id: String,
        cashout: Cashout,
        reason: String,
    },
}

#[derive(Debug, Error)]
pub enum SettlementError {
    /// Synchronous validation failure; nothing was debited or mutated.
    #[error(transparent)]
    Validation(#[from] EngineError),

    /// The debit never went through; round state is untouched.
    #[error("ledger debit failed: {0}")]
    DebitFailed(#[source] LedgerError),

    /// The debit went through but the round refused the bet; a compensating
    /// rollback was issued.
    #[error("bet registration failed: {0}")]
    RegistrationFailed(#[source] EngineError),
}

pub struct SettlementCoordinator {
    engine: Arc<CrashRoundEngine>,
    ledger: Arc<dyn LedgerService>,
    events: EventBus,
    round_config: RoundConfig,
    currency: String,
    pending: DashMap<String, PendingSettlement>,
    /// Debit transaction per (round, player), referenced by the credit.
    debit_index: DashMap<(String, String), String>,
}

impl SettlementCoordinator {
    pub fn new(
        engine: Arc<CrashRoundEngine>,
        ledger: Arc<dyn LedgerService>,
        events: EventBus,
        config: &CrashcoreConfig,
    ) -> Self {
        Self {
            engine,
            ledger,
            events,
            round_config: config.round.clone(),
            currency: config.ledger.currency.clone(),
            pending: DashMap::new(),
            debit_index: DashMap::new(),
        }
    }

    /// Place a bet: debit the ledger, then register in the round.
    ///
    /// The ordering guarantees the ledger is never left debited without
    /// either a matching registration or an explicit rollback.
    pub async fn place_bet(
        &self,
        player_id: &str,
        session_id: &str,
        amount: f64,
    ) -> Result<PlacedBet, SettlementError> {
        let amount_cents = match self.validate_amount(amount) {
            Ok(cents) => cents,
            Err(err) => {
                self.events.publish(GameEvent::BetRejected {
                    round_id: self.engine.active_round_id(),
                    player_id: player_id.to_string(),
                    reason: err.to_string(),
                });
                return Err(err.into());
            }
        };
        let Some(round_id) = self.engine.active_round_id() else {
            let err = EngineError::NoActiveRound;
            self.events.publish(GameEvent::BetRejected {
                round_id: None,
                player_id: player_id.to_string(),
                reason: err.to_string(),
            });
            return Err(err.into());
        };

        let request_id = Uuid::new_v4().to_string();
        self.track(
            &request_id,
            SettlementKind::Bet,
            &round_id,
            player_id,
            amount,
        );

        let receipt = match self
            .ledger
            .debit(&DebitRequest {
                request_id: request_id.clone(),
                round_id: round_id.clone(),
                player_id: player_id.to_string(),
                amount,
                currency: self.currency.clone(),
            })
            .await
        {
            Ok(receipt) => receipt,
            Err(err) => {
                self.resolve(&request_id, SettlementState::Failed, None, err.to_string());
                self.events.publish(GameEvent::BetRejected {
                    round_id: Some(round_id),
                    player_id: player_id.to_string(),
                    reason: err.to_string(),
                });
                return Err(SettlementError::DebitFailed(err));
            }
        };

        match self.engine.add_bet(player_id, amount_cents, session_id) {
            Ok(accepted) => {
                self.resolve_with_transaction(
                    &request_id,
                    SettlementState::Settled,
                    &receipt.transaction_id,
                );
                self.debit_index.insert(
                    (accepted.round_id.clone(), player_id.to_string()),
                    receipt.transaction_id.clone(),
                );
                debug!(
                    "bet settled: player {} staked {:.2} in round {}",
                    player_id, amount, accepted.round_id
                );
                self.events.publish(GameEvent::BetAccepted {
                    round_id: accepted.round_id.clone(),
                    player_id: player_id.to_string(),
                    amount,
                });
                Ok(PlacedBet {
                    round_id: accepted.round_id,
                    player_id: player_id.to_string(),
                    amount,
                    transaction_id: receipt.transaction_id,
                    new_balance: receipt.new_balance,
                })
            }
            Err(registration_err) => {
                self.rollback_debit(
                    &round_id,
                    player_id,
                    amount,
                    &receipt.transaction_id,
                    &registration_err,
                )
                .await;
                self.resolve(
                    &request_id,
                    SettlementState::Failed,
                    Some(&receipt.transaction_id),
                    registration_err.to_string(),
                );
                self.events.publish(GameEvent::BetRejected {
                    round_id: Some(round_id),
                    player_id: player_id.to_string(),
                    reason: registration_err.to_string(),
                });
                Err(SettlementError::RegistrationFailed(registration_err))
            }
        }
    }

    /// Cash out: lock in the multiplier first, then credit the ledger.
    ///
    /// A failed credit is reported as an unsettled win; the lock-in already
    /// happened and reversing it would break the fairness the player has
    /// been shown.
    pub async fn cashout(&self, player_id: &str) -> Result<CashoutOutcome, SettlementError> {
        let accepted = match self.engine.cashout(player_id) {
            Ok(accepted) => accepted,
            Err(err) => {
                self.events.publish(GameEvent::CashoutRejected {
                    round_id: self.engine.active_round_id(),
                    player_id: player_id.to_string(),
                    reason: err.to_string(),
                });
                return Err(err.into());
            }
        };
        let round_id = accepted.round_id;
        let cashout = accepted.cashout;
        let win_amount = money::to_major(cashout.win_amount);

        let request_id = Uuid::new_v4().to_string();
        self.track(
            &request_id,
            SettlementKind::Win,
            &round_id,
            player_id,
            win_amount,
        );
        let originating_transaction_id = self
            .debit_index
            .get(&(round_id.clone(), player_id.to_string()))
            .map(|entry| entry.value().clone());

        let request = CreditRequest {
            request_id: request_id.clone(),
            round_id: round_id.clone(),
            player_id: player_id.to_string(),
            bet_amount: money::to_major(cashout.bet_amount),
            multiplier: cashout.multiplier as f64 / 100.0,
            win_amount,
            currency: self.currency.clone(),
            originating_transaction_id,
        };
        match self.ledger.credit(&request).await {
            Ok(receipt) => {
                self.resolve_with_transaction(
                    &request_id,
                    SettlementState::Settled,
                    &receipt.transaction_id,
                );
                info!(
                    "cashout settled: player {} won {:.2} at {:.2}x in round {}",
                    player_id,
                    win_amount,
                    cashout.multiplier as f64 / 100.0,
                    round_id
                );
                self.events.publish(GameEvent::CashoutAccepted {
                    round_id: round_id.clone(),
                    player_id: player_id.to_string(),
                    multiplier: cashout.multiplier as f64 / 100.0,
                    win_amount,
                });
                Ok(CashoutOutcome::Settled {
                    round_id,
                    cashout,
                    transaction_id: receipt.transaction_id,
                    new_balance: receipt.new_balance,
                })
            }
            Err(err) => {
                error!(
                    "unsettled win: player {} in round {} is owed {:.2} but the credit failed: {}",
                    player_id, round_id, win_amount, err
                );
                self.resolve(
                    &request_id,
                    SettlementState::AwaitingReconciliation,
                    None,
                    err.to_string(),
                );
                self.events.publish(GameEvent::CashoutUnsettled {
                    round_id: round_id.clone(),
                    player_id: player_id.to_string(),
                    bet_amount: money::to_major(cashout.bet_amount),
                    multiplier: cashout.multiplier as f64 / 100.0,
                    win_amount,
                });
                Ok(CashoutOutcome::Unsettled {
                    round_id,
                    cashout,
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Drop per-round bookkeeping once a round is retired. Records still
    /// awaiting reconciliation are kept.
    pub fn finish_round(&self, summary: &RoundSummary) {
        self.debit_index
            .retain(|(round_id, _), _| round_id != &summary.round_id);
        self.pending.retain(|_, settlement| {
            settlement.round_id != summary.round_id
                || matches!(
                    settlement.state,
                    SettlementState::AwaitingReconciliation | SettlementState::InFlight
                )
        });
    }

    /// Settlements that need manual reconciliation against the ledger,
    /// keyed by (round, player) on the ledger side.
    pub fn unresolved(&self) -> Vec<PendingSettlement> {
        let mut unresolved: Vec<PendingSettlement> = self
            .pending
            .iter()
            .filter(|entry| entry.state == SettlementState::AwaitingReconciliation)
            .map(|entry| entry.value().clone())
            .collect();
        unresolved.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        unresolved
    }

    fn validate_amount(&self, amount: f64) -> Result<Cents, EngineError> {
        let cents = money::from_major(amount)?;
        if cents < self.round_config.min_bet_cents() || cents > self.round_config.max_bet_cents() {
            return Err(EngineError::BetOutOfBounds {
                amount,
                min: self.round_config.min_bet,
                max: self.round_config.max_bet,
            });
        }
        Ok(cents)
    }

    async fn rollback_debit(
        &self,
        round_id: &str,
        player_id: &str,
        amount: f64,
        originating_transaction_id: &str,
        cause: &EngineError,
    ) {
        let request_id = Uuid::new_v4().to_string();
        self.track(
            &request_id,
            SettlementKind::Rollback,
            round_id,
            player_id,
            amount,
        );
        let request = CompensateRequest {
            request_id: request_id.clone(),
            round_id: round_id.to_string(),
            player_id: player_id.to_string(),
            amount,
            currency: self.currency.clone(),
            originating_transaction_id: originating_transaction_id.to_string(),
            reason: cause.to_string(),
        };
        match self.ledger.compensate(&request).await {
            Ok(receipt) => {
                self.resolve_with_transaction(
                    &request_id,
                    SettlementState::Settled,
                    &receipt.transaction_id,
                );
                debug!(
                    "rolled back debit {} for player {} in round {}",
                    originating_transaction_id, player_id, round_id
                );
            }
            Err(err) => {
                error!(
                    "unresolved ledger inconsistency: debit {} for player {} in round {} could not be rolled back: {}",
                    originating_transaction_id, player_id, round_id, err
                );
                self.resolve(
                    &request_id,
                    SettlementState::AwaitingReconciliation,
                    Some(originating_transaction_id),
                    err.to_string(),
                );
            }
        }
    }

    fn track(
        &self,
        request_id: &str,
        kind: SettlementKind,
        round_id: &str,
        player_id: &str,
        amount: f64,
    ) {
        self.pending.insert(
            request_id.to_string(),
            PendingSettlement {
                request_id: request_id.to_string(),
                kind,
                round_id: round_id.to_string(),
                player_id: player_id.to_string(),
                amount,
                external_transaction_id: None,
                state: SettlementState::InFlight,
                detail: None,
                created_at: Utc::now(),
            },
        );
    }

    fn resolve(
        &self,
        request_id: &str,
        state: SettlementState,
        transaction_id: Option<&str>,
        detail: String,
    ) {
        if let Some(mut entry) = self.pending.get_mut(request_id) {
            entry.state = state;
            if let Some(transaction_id) = transaction_id {
                entry.external_transaction_id = Some(transaction_id.to_string());
            }
            entry.detail = Some(detail);
        }
    }

    fn resolve_with_transaction(
        &self,
        request_id: &str,
        state: SettlementState,
        transaction_id: &str,
    ) {
        if let Some(mut entry) = self.pending.get_mut(request_id) {
            entry.state = state;
            entry.external_transaction_id = Some(transaction_id.to_string());
        }
    }
}
