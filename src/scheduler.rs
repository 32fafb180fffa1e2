//! Wall-clock orchestration of the round cycle.
//!
//! Holds no money logic. One task drives the full cycle: generate a round,
//! hold the betting window, start the clock, tick until the crash, fan out
//! results, pause, repeat. The tick interval is dropped before the next
//! betting phase can start and only this task ever calls `tick()`, so two
//! tick loops can never run concurrently.

use crate::config::RoundConfig;
use crate::errors::EngineError;
use crate::events::{EventBus, GameEvent};
use crate::round::engine::{CrashRoundEngine, TickOutcome};
use crate::round::types::{money, RoundSnapshot, RoundSummary};
use crate::settlement::coordinator::SettlementCoordinator;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

pub struct RoundScheduler {
    engine: Arc<CrashRoundEngine>,
    coordinator: Arc<SettlementCoordinator>,
    events: EventBus,
    config: RoundConfig,
    history: Mutex<VecDeque<RoundSummary>>,
    shutdown: watch::Sender<bool>,
}

impl RoundScheduler {
    pub fn new(
        engine: Arc<CrashRoundEngine>,
        coordinator: Arc<SettlementCoordinator>,
        events: EventBus,
        config: RoundConfig,
    ) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            engine,
            coordinator,
            events,
            config,
            history: Mutex::new(VecDeque::new()),
            shutdown,
        })
    }

    /// Start the round loop. Only one loop should be spawned per scheduler.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        tokio::spawn(async move {
            scheduler.run(&mut shutdown).await;
        })
    }

    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Read-only view of the live round for newly-joining observers.
    pub fn snapshot(&self) -> RoundSnapshot {
        self.engine.snapshot()
    }

    /// Recent completed rounds, newest first.
    pub fn history(&self) -> Vec<RoundSummary> {
        let history = self.history.lock().expect("history lock poisoned");
        history.iter().cloned().collect()
    }

    async fn run(&self, shutdown: &mut watch::Receiver<bool>) {
        info!("round scheduler started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            match self.run_one_round(shutdown).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(EngineError::SeedChain(err)) => {
                    warn!("{}; rotating seed chain", err);
                    if let Err(rotate_err) = self.engine.rotate_seed_chain() {
                        error!("seed chain rotation failed: {}", rotate_err);
                        if !self.wait(self.config.inter_round_delay(), shutdown).await {
                            break;
                        }
                    }
                }
                Err(err) => {
                    error!("round cycle failed: {}", err);
                    if !self.wait(self.config.inter_round_delay(), shutdown).await {
                        break;
                    }
                }
            }
        }
        info!("round scheduler stopped");
    }

    /// One full cycle. Returns Ok(false) when interrupted by shutdown.
    async fn run_one_round(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool, EngineError> {
        let phase = self.engine.generate_round()?;
        let round_id = phase.round_id.clone();
        info!(
            "round {} open for bets ({}ms window)",
            round_id, self.config.betting_window_ms
        );
        self.events.publish(GameEvent::BettingPhaseStarted {
            round_id: round_id.clone(),
            commitment_hash: phase.server_seed_hash,
            client_seed: phase.client_seed,
            nonce: phase.nonce,
            duration_ms: self.config.betting_window_ms,
        });
        if !self.wait(self.config.betting_window(), shutdown).await {
            return Ok(false);
        }

        let (_, start_time) = self.engine.start_round()?;
        self.events.publish(GameEvent::RoundStarted {
            round_id: round_id.clone(),
            start_time: start_time.timestamp_millis(),
        });

        let mut ticker = tokio::time::interval(self.config.tick_interval());
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.engine.tick()? {
                        TickOutcome::Running { multiplier, elapsed_ms } => {
                            self.events.publish(GameEvent::Tick {
                                round_id: round_id.clone(),
                                multiplier: multiplier as f64 / 100.0,
                                elapsed_ms,
                            });
                        }
                        TickOutcome::Crashed(summary) => {
                            self.finish_round(summary);
                            break;
                        }
                    }
                }
                _ = shutdown.changed() => return Ok(false),
            }
        }
        // The ticker is dropped here, before the next betting phase.

        if !self.wait(self.config.inter_round_delay(), shutdown).await {
            return Ok(false);
        }
        Ok(true)
    }

    fn finish_round(&self, summary: RoundSummary) {
        info!(
            "round {} crashed at {:.2}x: {} bets, {} cashouts, {} lost",
            summary.round_id,
            summary.crash_point as f64 / 100.0,
            summary.bets.len(),
            summary.cashouts.len(),
            summary.losers.len()
        );
        self.events.publish(GameEvent::RoundCrashed {
            round_id: summary.round_id.clone(),
            crash_point: summary.crash_point as f64 / 100.0,
            server_seed: summary.server_seed.clone(),
            server_seed_hash: summary.server_seed_hash.clone(),
        });
        for loser in &summary.losers {
            self.events.publish(GameEvent::BetLost {
                round_id: summary.round_id.clone(),
                player_id: loser.player_id.clone(),
                amount: money::to_major(loser.amount),
            });
        }
        self.coordinator.finish_round(&summary);

        let mut history = self.history.lock().expect("history lock poisoned");
        history.push_front(summary);
        history.truncate(self.config.history_limit);
    }

    async fn wait(&self, duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = shutdown.changed() => false,
        }
    }
}
