//! Lifecycle and per-player events emitted by the round cycle.
//!
//! The engine and scheduler publish onto a broadcast channel and know
//! nothing about transport delivery; the WebSocket layer subscribes like
//! any other observer. Sends with no subscribers are normal.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Events fanned out over the real-time channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GameEvent {
    BettingPhaseStarted {
        round_id: String,
        commitment_hash: String,
        client_seed: String,
        nonce: u64,
        duration_ms: u64,
    },
    RoundStarted {
        round_id: String,
        /// Milliseconds since the Unix epoch.
        start_time: i64,
    },
    Tick {
        round_id: String,
        multiplier: f64,
        elapsed_ms: u64,
    },
    RoundCrashed {
        round_id: String,
        crash_point: f64,
        server_seed: String,
        server_seed_hash: String,
    },
    BetAccepted {
        round_id: String,
        player_id: String,
        amount: f64,
    },
    BetRejected {
        #[serde(skip_serializing_if = "Option::is_none")]
        round_id: Option<String>,
        player_id: String,
        reason: String,
    },
    CashoutAccepted {
        round_id: String,
        player_id: String,
        multiplier: f64,
        win_amount: f64,
    },
    CashoutRejected {
        #[serde(skip_serializing_if = "Option::is_none")]
        round_id: Option<String>,
        player_id: String,
        reason: String,
    },
    CashoutUnsettled {
        round_id: String,
        player_id: String,
        bet_amount: f64,
        multiplier: f64,
        win_amount: f64,
    },
    BetLost {
        round_id: String,
        player_id: String,
        amount: f64,
    },
}

impl GameEvent {
    /// The player a per-player event is addressed to; `None` for round
    /// lifecycle events.
    pub fn player_id(&self) -> Option<&str> {
        match self {
            GameEvent::BetAccepted { player_id, .. }
            | GameEvent::BetRejected { player_id, .. }
            | GameEvent::CashoutAccepted { player_id, .. }
            | GameEvent::CashoutRejected { player_id, .. }
            | GameEvent::CashoutUnsettled { player_id, .. }
            | GameEvent::BetLost { player_id, .. } => Some(player_id),
            _ => None,
        }
    }
}

/// Broadcast fan-out for game events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<GameEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GameEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: GameEvent) {
        if let Err(e) = self.tx.send(event) {
            debug!("no subscribers for game event: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_wire_names() {
        let event = GameEvent::BettingPhaseStarted {
            round_id: "r1".to_string(),
            commitment_hash: "ab".to_string(),
            client_seed: "cd".to_string(),
            nonce: 3,
            duration_ms: 5000,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "bettingPhaseStarted");
        assert_eq!(json["roundId"], "r1");
        assert_eq!(json["durationMs"], 5000);
    }

    #[test]
    fn test_player_id_only_on_player_events() {
        let tick = GameEvent::Tick {
            round_id: "r1".to_string(),
            multiplier: 1.5,
            elapsed_ms: 100,
        };
        assert!(tick.player_id().is_none());

        let lost = GameEvent::BetLost {
            round_id: "r1".to_string(),
            player_id: "p1".to_string(),
            amount: 5.0,
        };
        assert_eq!(lost.player_id(), Some("p1"));
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_harmless() {
        let bus = EventBus::new(8);
        bus.publish(GameEvent::Tick {
            round_id: "r1".to_string(),
            multiplier: 1.0,
            elapsed_ms: 0,
        });

        let mut rx = bus.subscribe();
        bus.publish(GameEvent::Tick {
            round_id: "r1".to_string(),
            multiplier: 1.01,
            elapsed_ms: 100,
        });
        let received = rx.recv().await.unwrap();
        assert!(matches!(received, GameEvent::Tick { .. }));
    }
}
