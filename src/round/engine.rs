//! The round state machine.
//!
//! One live round at a time, moving `pending -> betting -> running ->
//! crashed`. Every mutation goes through one exclusive lock, so a cashout
//! and the tick that crosses the crash threshold can never interleave:
//! whichever is ordered first wins and the loser observes the
//! post-transition state. Nothing blocks while the lock is held.

use crate::config::RoundConfig;
use crate::errors::EngineError;
use crate::round::fairness::{self, BASELINE_MULTIPLIER};
use crate::round::seed_chain::SeedChain;
use crate::round::types::{
    money, Bet, Cashout, Cents, Round, RoundSnapshot, RoundStatus, RoundSummary,
};
use chrono::{DateTime, Utc};
use rand::RngCore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

/// Public material of a freshly generated round, for the betting-phase
/// announcement. Never includes the crash point or the unrevealed seed.
#[derive(Debug, Clone)]
pub struct BettingPhase {
    pub round_id: String,
    pub server_seed_hash: String,
    pub client_seed: String,
    pub nonce: u64,
}

/// A bet registered in the live round.
#[derive(Debug, Clone)]
pub struct AcceptedBet {
    pub round_id: String,
    pub bet: Bet,
}

/// A cashout locked in against the live round.
#[derive(Debug, Clone)]
pub struct AcceptedCashout {
    pub round_id: String,
    pub cashout: Cashout,
}

/// Result of one tick of the multiplier clock.
#[derive(Debug)]
pub enum TickOutcome {
    Running { multiplier: u64, elapsed_ms: u64 },
    Crashed(RoundSummary),
}

pub struct CrashRoundEngine {
    config: RoundConfig,
    seed_chain: Mutex<SeedChain>,
    round: Mutex<Option<Round>>,
    nonce: AtomicU64,
}

impl CrashRoundEngine {
    pub fn new(config: &RoundConfig) -> Result<Self, EngineError> {
        let seed_chain = SeedChain::generate(config.seed_chain_length)?;
        info!(
            "seed chain ready: {} seeds, commitment {}",
            seed_chain.remaining(),
            hex::encode(seed_chain.commitment())
        );
        Ok(Self {
            config: config.clone(),
            seed_chain: Mutex::new(seed_chain),
            round: Mutex::new(None),
            nonce: AtomicU64::new(0),
        })
    }

    /// Hex commitment of the active seed chain.
    pub fn chain_commitment(&self) -> String {
        let chain = self.seed_chain.lock().expect("seed chain lock poisoned");
        hex::encode(chain.commitment())
    }

    /// Replace an exhausted chain with a fresh one, publishing a fresh
    /// commitment. Refused while a round is live.
    pub fn rotate_seed_chain(&self) -> Result<String, EngineError> {
        let guard = self.round.lock().expect("round state lock poisoned");
        if guard.is_some() {
            return Err(EngineError::RoundInProgress);
        }
        let fresh = SeedChain::generate(self.config.seed_chain_length)?;
        let commitment = hex::encode(fresh.commitment());
        *self.seed_chain.lock().expect("seed chain lock poisoned") = fresh;
        warn!("seed chain rotated; new commitment {}", commitment);
        Ok(commitment)
    }

    /// Create the next round: draw seed material, fix the crash point, and
    /// open betting. The crash point is computed here, before any player
    /// interaction with the round is possible.
    pub fn generate_round(&self) -> Result<BettingPhase, EngineError> {
        let mut guard = self.round.lock().expect("round state lock poisoned");
        if guard.is_some() {
            return Err(EngineError::RoundInProgress);
        }

        let server_seed = {
            let chain = self.seed_chain.lock().expect("seed chain lock poisoned");
            chain.current_seed()?
        };
        let server_seed_hash = fairness::seed_hash(&server_seed);

        let mut client_entropy = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut client_entropy);
        let client_seed = hex::encode(client_entropy);
        let nonce = self.nonce.fetch_add(1, Ordering::SeqCst) + 1;

        let crash_point = fairness::crash_point(
            &server_seed,
            &client_seed,
            nonce,
            self.config.max_crash_hundredths(),
        );

        let round = Round {
            id: Uuid::new_v4().to_string(),
            server_seed,
            server_seed_hash,
            client_seed: client_seed.clone(),
            nonce,
            crash_point,
            status: RoundStatus::Betting,
            current_multiplier: BASELINE_MULTIPLIER,
            start_time: None,
            started_at: None,
            bets: HashMap::new(),
            cashouts: HashMap::new(),
        };
        let phase = BettingPhase {
            round_id: round.id.clone(),
            server_seed_hash: hex::encode(server_seed_hash),
            client_seed,
            nonce,
        };
        *guard = Some(round);
        Ok(phase)
    }

    /// Move the round from betting to running and start the clock.
    pub fn start_round(&self) -> Result<(String, DateTime<Utc>), EngineError> {
        let mut guard = self.round.lock().expect("round state lock poisoned");
        let round = guard.as_mut().ok_or(EngineError::NoActiveRound)?;
        if round.status != RoundStatus::Betting {
            return Err(EngineError::WrongPhase {
                expected: RoundStatus::Betting,
                actual: round.status,
            });
        }
        round.status = RoundStatus::Running;
        round.current_multiplier = BASELINE_MULTIPLIER;
        let now = Utc::now();
        round.start_time = Some(now);
        round.started_at = Some(Instant::now());
        Ok((round.id.clone(), now))
    }

    /// Register a bet in the betting window. At most one bet per player per
    /// round; the bet is durable for the round's lifetime once accepted.
    pub fn add_bet(
        &self,
        player_id: &str,
        amount: Cents,
        session_id: &str,
    ) -> Result<AcceptedBet, EngineError> {
        if amount < self.config.min_bet_cents() || amount > self.config.max_bet_cents() {
            return Err(EngineError::BetOutOfBounds {
                amount: money::to_major(amount),
                min: self.config.min_bet,
                max: self.config.max_bet,
            });
        }

        let mut guard = self.round.lock().expect("round state lock poisoned");
        let round = guard.as_mut().ok_or(EngineError::NoActiveRound)?;
        if round.status != RoundStatus::Betting {
            return Err(EngineError::WrongPhase {
                expected: RoundStatus::Betting,
                actual: round.status,
            });
        }
        if round.bets.contains_key(player_id) {
            return Err(EngineError::DuplicateBet(player_id.to_string()));
        }

        let bet = Bet {
            player_id: player_id.to_string(),
            session_id: session_id.to_string(),
            amount,
            placed_at: Utc::now(),
        };
        round.bets.insert(player_id.to_string(), bet.clone());
        Ok(AcceptedBet {
            round_id: round.id.clone(),
            bet,
        })
    }

    /// Lock in a payout at the current multiplier. The multiplier read and
    /// the cashout record are one indivisible step under the round lock, so
    /// a cashout can never land after the crash transition has run.
    pub fn cashout(&self, player_id: &str) -> Result<AcceptedCashout, EngineError> {
        let mut guard = self.round.lock().expect("round state lock poisoned");
        let round = guard.as_mut().ok_or(EngineError::NoActiveRound)?;
        if round.status != RoundStatus::Running {
            return Err(EngineError::WrongPhase {
                expected: RoundStatus::Running,
                actual: round.status,
            });
        }
        let bet = round
            .bets
            .get(player_id)
            .ok_or_else(|| EngineError::NoBetFound(player_id.to_string()))?;
        if round.cashouts.contains_key(player_id) {
            return Err(EngineError::AlreadyCashedOut(player_id.to_string()));
        }

        let multiplier = round.current_multiplier;
        // Truncating division: the sub-cent remainder stays with the house.
        let win_amount = bet.amount.saturating_mul(multiplier) / 100;
        let cashout = Cashout {
            player_id: player_id.to_string(),
            bet_amount: bet.amount,
            multiplier,
            win_amount,
            cashed_out_at: Utc::now(),
        };
        round.cashouts.insert(player_id.to_string(), cashout.clone());
        Ok(AcceptedCashout {
            round_id: round.id.clone(),
            cashout,
        })
    }

    /// Advance the multiplier clock. When the committed crash point is
    /// reached, the final multiplier is clamped to it exactly, the seed
    /// chain advances by one, and the round is retired to a summary.
    pub fn tick(&self) -> Result<TickOutcome, EngineError> {
        let mut guard = self.round.lock().expect("round state lock poisoned");
        let round = guard.as_mut().ok_or(EngineError::NoActiveRound)?;
        if round.status != RoundStatus::Running {
            return Err(EngineError::WrongPhase {
                expected: RoundStatus::Running,
                actual: round.status,
            });
        }

        let elapsed_ms = round
            .started_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);
        let multiplier = fairness::multiplier_at(elapsed_ms, self.config.growth_constant)
            .max(round.current_multiplier);

        if multiplier < round.crash_point {
            round.current_multiplier = multiplier;
            return Ok(TickOutcome::Running {
                multiplier,
                elapsed_ms,
            });
        }

        round.current_multiplier = round.crash_point;
        round.status = RoundStatus::Crashed;
        {
            let mut chain = self.seed_chain.lock().expect("seed chain lock poisoned");
            chain.advance()?;
        }
        let round = guard.take().expect("crashed round present");
        Ok(TickOutcome::Crashed(Self::summarize(round)))
    }

    /// Read-only view of the current round for observers.
    pub fn snapshot(&self) -> RoundSnapshot {
        let mut snapshot = {
            let guard = self.round.lock().expect("round state lock poisoned");
            match guard.as_ref() {
                Some(round) => RoundSnapshot {
                    status: round.status,
                    round_id: Some(round.id.clone()),
                    multiplier: round.current_multiplier as f64 / 100.0,
                    elapsed_ms: round.started_at.map(|t| t.elapsed().as_millis() as u64),
                    client_seed: Some(round.client_seed.clone()),
                    nonce: Some(round.nonce),
                    server_seed_hash: Some(hex::encode(round.server_seed_hash)),
                    bet_count: round.bets.len(),
                    cashout_count: round.cashouts.len(),
                    chain_commitment: String::new(),
                },
                None => RoundSnapshot {
                    status: RoundStatus::Pending,
                    round_id: None,
                    multiplier: 1.0,
                    elapsed_ms: None,
                    client_seed: None,
                    nonce: None,
                    server_seed_hash: None,
                    bet_count: 0,
                    cashout_count: 0,
                    chain_commitment: String::new(),
                },
            }
        };
        snapshot.chain_commitment = self.chain_commitment();
        snapshot
    }

    /// Id of the live round, if any.
    pub fn active_round_id(&self) -> Option<String> {
        let guard = self.round.lock().expect("round state lock poisoned");
        guard.as_ref().map(|round| round.id.clone())
    }

    pub fn max_crash_hundredths(&self) -> u64 {
        self.config.max_crash_hundredths()
    }

    fn summarize(round: Round) -> RoundSummary {
        let losers = round.losers();
        let mut bets: Vec<Bet> = round.bets.into_values().collect();
        bets.sort_by(|a, b| a.player_id.cmp(&b.player_id));
        let mut cashouts: Vec<Cashout> = round.cashouts.into_values().collect();
        cashouts.sort_by(|a, b| a.player_id.cmp(&b.player_id));
        RoundSummary {
            round_id: round.id,
            crash_point: round.crash_point,
            server_seed: hex::encode(round.server_seed),
            server_seed_hash: hex::encode(round.server_seed_hash),
            client_seed: round.client_seed,
            nonce: round.nonce,
            crashed_at: Utc::now(),
            bets,
            cashouts,
            losers,
        }
    }

    #[cfg(test)]
    pub(crate) fn force_multiplier(&self, hundredths: u64) {
        let mut guard = self.round.lock().expect("round state lock poisoned");
        if let Some(round) = guard.as_mut() {
            round.current_multiplier = hundredths;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> RoundConfig {
        RoundConfig {
            betting_window_ms: 50,
            tick_interval_ms: 10,
            inter_round_delay_ms: 10,
            growth_constant: 0.00006,
            max_crash_point: 100.0,
            min_bet: 0.10,
            max_bet: 1_000.0,
            seed_chain_length: 8,
            history_limit: 4,
        }
    }

    fn running_engine() -> CrashRoundEngine {
        let engine = CrashRoundEngine::new(&test_config()).unwrap();
        engine.generate_round().unwrap();
        engine
    }

    #[test]
    fn test_generate_requires_no_live_round() {
        let engine = running_engine();
        assert!(matches!(
            engine.generate_round(),
            Err(EngineError::RoundInProgress)
        ));
    }

    #[test]
    fn test_start_requires_betting_phase() {
        let engine = CrashRoundEngine::new(&test_config()).unwrap();
        assert!(matches!(
            engine.start_round(),
            Err(EngineError::NoActiveRound)
        ));
        engine.generate_round().unwrap();
        engine.start_round().unwrap();
        assert!(matches!(
            engine.start_round(),
            Err(EngineError::WrongPhase { .. })
        ));
    }

    #[test]
    fn test_bet_rules() {
        let engine = running_engine();
        engine.add_bet("p1", 1000, "s1").unwrap();
        assert!(matches!(
            engine.add_bet("p1", 1000, "s1"),
            Err(EngineError::DuplicateBet(_))
        ));
        assert!(matches!(
            engine.add_bet("p2", 1, "s2"),
            Err(EngineError::BetOutOfBounds { .. })
        ));

        engine.start_round().unwrap();
        assert!(matches!(
            engine.add_bet("p3", 1000, "s3"),
            Err(EngineError::WrongPhase { .. })
        ));
    }

    #[test]
    fn test_cashout_rules() {
        let engine = running_engine();
        engine.add_bet("p1", 1000, "s1").unwrap();

        // Not running yet.
        assert!(matches!(
            engine.cashout("p1"),
            Err(EngineError::WrongPhase { .. })
        ));

        engine.start_round().unwrap();
        assert!(matches!(
            engine.cashout("ghost"),
            Err(EngineError::NoBetFound(_))
        ));

        engine.force_multiplier(247);
        let accepted = engine.cashout("p1").unwrap();
        assert_eq!(accepted.cashout.multiplier, 247);
        assert_eq!(accepted.cashout.win_amount, 2470);
        assert!(matches!(
            engine.cashout("p1"),
            Err(EngineError::AlreadyCashedOut(_))
        ));
    }

    #[test]
    fn test_win_amount_truncates() {
        let engine = running_engine();
        // 3.33 at 1.07x is 3.5631; the fractional cent is dropped.
        engine.add_bet("p1", 333, "s1").unwrap();
        engine.start_round().unwrap();
        engine.force_multiplier(107);
        let accepted = engine.cashout("p1").unwrap();
        assert_eq!(accepted.cashout.win_amount, 356);
    }

    #[test]
    fn test_tick_monotone_then_clamped_crash() {
        let config = RoundConfig {
            // Fast curve so the round crashes within a few milliseconds.
            growth_constant: 0.5,
            ..test_config()
        };
        let engine = CrashRoundEngine::new(&config).unwrap();
        engine.generate_round().unwrap();
        engine.add_bet("loser", 500, "s1").unwrap();
        engine.start_round().unwrap();

        let mut previous = 0;
        loop {
            std::thread::sleep(std::time::Duration::from_millis(2));
            match engine.tick().unwrap() {
                TickOutcome::Running { multiplier, .. } => {
                    assert!(multiplier >= previous);
                    previous = multiplier;
                }
                TickOutcome::Crashed(summary) => {
                    // Final multiplier is the committed point, not an
                    // overshoot of the curve.
                    assert!(summary.crash_point >= previous);
                    assert_eq!(summary.losers.len(), 1);
                    assert_eq!(summary.losers[0].player_id, "loser");
                    break;
                }
            }
        }
        // Round retired; the next one must be generated fresh.
        assert!(matches!(engine.tick(), Err(EngineError::NoActiveRound)));
        engine.generate_round().unwrap();
    }

    #[test]
    fn test_crash_reveal_verifies_against_commitments() {
        let config = RoundConfig {
            growth_constant: 0.5,
            ..test_config()
        };
        let engine = CrashRoundEngine::new(&config).unwrap();
        let commitment = engine.chain_commitment();

        let mut revealed = Vec::new();
        for _ in 0..2 {
            engine.generate_round().unwrap();
            engine.start_round().unwrap();
            loop {
                std::thread::sleep(std::time::Duration::from_millis(2));
                if let TickOutcome::Crashed(summary) = engine.tick().unwrap() {
                    revealed.push(summary);
                    break;
                }
            }
        }

        // First reveal hashes to the published commitment, the second to
        // the first reveal.
        assert_eq!(revealed[0].server_seed_hash, commitment);
        let seed0 = hex::decode(&revealed[0].server_seed).unwrap();
        assert_eq!(hex::encode(fairness::seed_hash(&seed0)), commitment);
        let seed1 = hex::decode(&revealed[1].server_seed).unwrap();
        assert_eq!(
            hex::encode(fairness::seed_hash(&seed1)),
            revealed[0].server_seed
        );

        // And the revealed crash points reproduce from the reveal.
        for summary in &revealed {
            let verified = fairness::verify(
                &summary.server_seed,
                &summary.client_seed,
                summary.nonce,
                engine.max_crash_hundredths(),
            )
            .unwrap();
            assert_eq!(verified.crash_point, summary.crash_point as f64 / 100.0);
        }
    }

    #[test]
    fn test_cashout_races_crash_one_winner() {
        use std::sync::{Arc, Barrier};

        for _ in 0..20 {
            let config = RoundConfig {
                // Past the crash threshold almost immediately.
                growth_constant: 1.0,
                ..test_config()
            };
            let engine = Arc::new(CrashRoundEngine::new(&config).unwrap());
            engine.generate_round().unwrap();
            engine.add_bet("racer", 1000, "s1").unwrap();
            engine.start_round().unwrap();
            std::thread::sleep(std::time::Duration::from_millis(5));

            let barrier = Arc::new(Barrier::new(2));
            let tick_engine = engine.clone();
            let tick_barrier = barrier.clone();
            let ticker = std::thread::spawn(move || {
                tick_barrier.wait();
                tick_engine.tick()
            });
            let cash_engine = engine.clone();
            let cash_barrier = barrier.clone();
            let casher = std::thread::spawn(move || {
                cash_barrier.wait();
                cash_engine.cashout("racer")
            });

            let tick_result = ticker.join().unwrap();
            let cash_result = casher.join().unwrap();

            let summary = match tick_result.unwrap() {
                TickOutcome::Crashed(summary) => summary,
                TickOutcome::Running { .. } => panic!("round should have crashed"),
            };
            let lost = summary.losers.iter().any(|b| b.player_id == "racer");
            match cash_result {
                // Cashout won the race: the player is excluded from losers.
                Ok(accepted) => {
                    assert!(!lost);
                    assert_eq!(accepted.cashout.player_id, "racer");
                    assert_eq!(summary.cashouts.len(), 1);
                }
                // Crash won: the cashout observes the retired round.
                Err(EngineError::NoActiveRound) | Err(EngineError::WrongPhase { .. }) => {
                    assert!(lost);
                    assert!(summary.cashouts.is_empty());
                }
                Err(other) => panic!("unexpected cashout error: {}", other),
            }
        }
    }

    #[test]
    fn test_rotate_refused_while_round_live() {
        let engine = running_engine();
        assert!(matches!(
            engine.rotate_seed_chain(),
            Err(EngineError::RoundInProgress)
        ));
    }

    #[test]
    fn test_rotate_publishes_new_commitment() {
        let engine = CrashRoundEngine::new(&test_config()).unwrap();
        let before = engine.chain_commitment();
        let after = engine.rotate_seed_chain().unwrap();
        assert_ne!(before, after);
        assert_eq!(after, engine.chain_commitment());
    }

    #[test]
    fn test_snapshot_never_leaks_crash_point() {
        let engine = running_engine();
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.status, RoundStatus::Betting);
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("crashPoint"));
        assert!(!json.contains("serverSeed\""));
    }
}
