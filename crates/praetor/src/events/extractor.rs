//! The ingestion hook that turns raw lines into [`ServerEvent`]s and keeps
//! the small amount of session state derived from logs.

use chrono::Utc;
use log::{debug, info};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::activity::{ActivityDeduper, DEFAULT_DEDUP_WINDOW, parse_activity};
use super::chat::{is_mention, parse_chat};
use super::{ActivityEvent, ActivityKind, ChatEvent, ErrorEvent, EventBus, ServerEvent};
use crate::logs::LineHook;

pub const MAX_ERROR_LEN: usize = 500;

#[derive(Debug, Clone)]
pub struct ExtractorConfig {
    pub mention_enabled: bool,
    pub mention_keyword: String,
    pub bot_name: String,
    pub dedup_window: Duration,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            mention_enabled: true,
            mention_keyword: "praetor".to_string(),
            bot_name: "Praetor".to_string(),
            dedup_window: DEFAULT_DEDUP_WINDOW,
        }
    }
}

/// Log-derived session state shared with the controllers' status queries.
#[derive(Debug, Default)]
pub struct SessionState {
    players: Mutex<BTreeSet<String>>,
    last_error: Mutex<Option<String>>,
}

impl SessionState {
    pub fn players_online(&self) -> Vec<String> {
        self.players
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Names compare case-insensitively; the spelling of the first join is kept.
    fn apply(&self, kind: ActivityKind, player: &str) {
        let mut players = self.players.lock().unwrap_or_else(PoisonError::into_inner);
        match kind {
            ActivityKind::Join => {
                if !players.iter().any(|p| p.eq_ignore_ascii_case(player)) {
                    players.insert(player.to_string());
                }
            }
            ActivityKind::Leave => {
                players.retain(|p| !p.eq_ignore_ascii_case(player));
            }
        }
    }

    fn set_last_error(&self, line: &str) {
        let trimmed: String = line.trim().chars().take(MAX_ERROR_LEN).collect();
        *self.last_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(trimmed);
    }

    /// Forget online players, e.g. when the server process goes away.
    pub fn reset(&self) {
        self.players
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

pub struct EventExtractor {
    config: ExtractorConfig,
    state: Arc<SessionState>,
    bus: Arc<EventBus>,
    dedup: ActivityDeduper,
}

impl EventExtractor {
    pub fn new(config: ExtractorConfig, state: Arc<SessionState>, bus: Arc<EventBus>) -> Self {
        let dedup = ActivityDeduper::new(config.dedup_window);
        Self {
            config,
            state,
            bus,
            dedup,
        }
    }

    pub fn ingest_line(&self, line: &str) {
        self.ingest_line_at(line, Instant::now());
    }

    /// Like [`ingest_line`](Self::ingest_line) with an explicit monotonic clock for dedup.
    pub fn ingest_line_at(&self, line: &str, now: Instant) {
        let lower = line.to_lowercase();
        if lower.contains("error") || lower.contains("exception") {
            self.state.set_last_error(line);
            self.bus.publish(ServerEvent::Error(ErrorEvent {
                at: Utc::now(),
                line: line.trim().chars().take(MAX_ERROR_LEN).collect(),
            }));
        }

        if let Some(chat) = parse_chat(line) {
            let event = ChatEvent {
                at: Utc::now(),
                player: chat.player,
                message: chat.message,
            };
            let mention = self.config.mention_enabled
                && is_mention(
                    &event.player,
                    &event.message,
                    &self.config.mention_keyword,
                    &self.config.bot_name,
                );
            debug!("chat from {}: {}", event.player, event.message);
            self.bus.publish(ServerEvent::Chat(event.clone()));
            if mention {
                info!("mention from {}", event.player);
                self.bus.publish(ServerEvent::Mention(event));
            }
            return;
        }

        if let Some((kind, player)) = parse_activity(line) {
            if !self.dedup.accept(kind, &player, now) {
                debug!("suppressed duplicate {kind} for {player}");
                return;
            }
            self.state.apply(kind, &player);
            info!("player {kind}: {player}");
            self.bus.publish(ServerEvent::Activity(ActivityEvent {
                at: Utc::now(),
                kind,
                player,
            }));
        }
    }
}

impl LineHook for EventExtractor {
    fn on_line(&self, line: &str) {
        self.ingest_line(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn setup() -> (
        EventExtractor,
        Arc<SessionState>,
        tokio::sync::broadcast::Receiver<ServerEvent>,
    ) {
        let state = Arc::new(SessionState::default());
        let bus = Arc::new(EventBus::default());
        let rx = bus.subscribe();
        let extractor = EventExtractor::new(ExtractorConfig::default(), state.clone(), bus);
        (extractor, state, rx)
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut out = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(ev) => out.push(ev),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return out,
                Err(TryRecvError::Lagged(_)) => continue,
            }
        }
    }

    fn activity_count(events: &[ServerEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, ServerEvent::Activity(_)))
            .count()
    }

    #[test]
    fn test_join_dedup_window() {
        let (extractor, state, mut rx) = setup();
        let t0 = Instant::now();
        extractor.ingest_line_at("TestPlayer joined the server", t0);
        extractor.ingest_line_at("TestPlayer joined the server", t0 + Duration::from_secs(1));
        assert_eq!(activity_count(&drain(&mut rx)), 1);
        assert_eq!(state.players_online(), vec!["TestPlayer"]);

        extractor.ingest_line_at("TestPlayer joined the server", t0 + Duration::from_secs(6));
        assert_eq!(activity_count(&drain(&mut rx)), 1);
    }

    #[test]
    fn test_different_players_not_deduplicated() {
        let (extractor, state, mut rx) = setup();
        let t0 = Instant::now();
        extractor.ingest_line_at("Player1 joined the server", t0);
        extractor.ingest_line_at("Player2 joined the server", t0);
        assert_eq!(activity_count(&drain(&mut rx)), 2);
        assert_eq!(state.players_online(), vec!["Player1", "Player2"]);
    }

    #[test]
    fn test_bedrock_connect_disconnect() {
        let (extractor, state, mut rx) = setup();
        extractor.ingest_line("[2025-01-01 12:00:00:001 INFO] Player connected: Steve, xuid: 123");
        assert_eq!(state.players_online(), vec!["Steve"]);
        extractor
            .ingest_line("[2025-01-01 12:05:00:001 INFO] Player disconnected: Steve, xuid: 123");
        assert!(state.players_online().is_empty());
        let events = drain(&mut rx);
        assert!(matches!(
            &events[1],
            ServerEvent::Activity(ActivityEvent { kind: ActivityKind::Leave, player, .. }) if player == "Steve"
        ));
    }

    #[test]
    fn test_roster_ignores_name_case() {
        let (extractor, state, _rx) = setup();
        let t0 = Instant::now();
        extractor.ingest_line_at("Steve joined the game", t0);
        // outside the dedup window, so the roster sees the second join
        extractor.ingest_line_at("STEVE joined the game", t0 + Duration::from_secs(6));
        assert_eq!(state.players_online(), vec!["Steve"]);
        extractor.ingest_line_at("steve left the game", t0 + Duration::from_secs(7));
        assert!(state.players_online().is_empty());
    }

    #[test]
    fn test_chat_and_mention_events() {
        let (extractor, _state, mut rx) = setup();
        extractor.ingest_line("<Steve> hello there");
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ServerEvent::Chat(c) if c.player == "Steve"));

        extractor.ingest_line("Chat: Steve: Praetor are you online?");
        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[1], ServerEvent::Mention(c) if c.message == "Praetor are you online?"));

        extractor.ingest_line("[INFO] <sefton> Hi praetor");
        assert!(matches!(drain(&mut rx).last(), Some(ServerEvent::Mention(_))));

        extractor.ingest_line("Praetor: I am praetor");
        let events = drain(&mut rx);
        assert!(!events.iter().any(|e| matches!(e, ServerEvent::Mention(_))));
    }

    #[test]
    fn test_chat_line_is_not_activity() {
        let (extractor, state, mut rx) = setup();
        extractor.ingest_line("<Steve> I just joined the server");
        assert!(state.players_online().is_empty());
        assert_eq!(activity_count(&drain(&mut rx)), 0);
    }

    #[test]
    fn test_error_slot_overwritten_and_truncated() {
        let (extractor, state, mut rx) = setup();
        extractor.ingest_line("  java.lang.NullPointerException at foo  ");
        assert_eq!(
            state.last_error().as_deref(),
            Some("java.lang.NullPointerException at foo")
        );
        extractor.ingest_line(&format!("ERROR {}", "x".repeat(600)));
        assert_eq!(state.last_error().unwrap().chars().count(), MAX_ERROR_LEN);
        assert!(drain(&mut rx).iter().all(|e| matches!(e, ServerEvent::Error(_))));
    }

    #[test]
    fn test_mentions_disabled() {
        let state = Arc::new(SessionState::default());
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let config = ExtractorConfig {
            mention_enabled: false,
            ..ExtractorConfig::default()
        };
        EventExtractor::new(config, state, bus).ingest_line("Steve: praetor?");
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], ServerEvent::Chat(_)));
    }
}
