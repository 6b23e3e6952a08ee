use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use super::{ActivityEvent, ChatEvent, ServerEvent};

pub const DEFAULT_JOURNAL_LEN: usize = 500;

/// Bounded history of chat and activity events, oldest first.
#[derive(Debug)]
pub struct EventJournal {
    max_len: usize,
    chat: Mutex<VecDeque<ChatEvent>>,
    activity: Mutex<VecDeque<ActivityEvent>>,
}

impl Default for EventJournal {
    fn default() -> Self {
        Self::new(DEFAULT_JOURNAL_LEN)
    }
}

fn push_bounded<T>(queue: &Mutex<VecDeque<T>>, item: T, max_len: usize) {
    let mut queue = queue.lock().unwrap_or_else(PoisonError::into_inner);
    while queue.len() >= max_len {
        queue.pop_front();
    }
    queue.push_back(item);
}

fn since<T: Clone>(
    queue: &Mutex<VecDeque<T>>,
    since: Option<DateTime<Utc>>,
    at: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<T> {
    queue
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .iter()
        .filter(|item| since.is_none_or(|ts| at(item) >= ts))
        .cloned()
        .collect()
}

impl EventJournal {
    pub fn new(max_len: usize) -> Self {
        Self {
            max_len: max_len.max(1),
            chat: Mutex::new(VecDeque::new()),
            activity: Mutex::new(VecDeque::new()),
        }
    }

    /// Mentions are not stored separately; their `Chat` twin already is.
    pub fn record(&self, event: &ServerEvent) {
        match event {
            ServerEvent::Chat(chat) => push_bounded(&self.chat, chat.clone(), self.max_len),
            ServerEvent::Activity(activity) => {
                push_bounded(&self.activity, activity.clone(), self.max_len)
            }
            ServerEvent::Mention(_) | ServerEvent::Error(_) => {}
        }
    }

    pub fn chat_since(&self, ts: Option<DateTime<Utc>>) -> Vec<ChatEvent> {
        since(&self.chat, ts, |e| e.at)
    }

    pub fn activity_since(&self, ts: Option<DateTime<Utc>>) -> Vec<ActivityEvent> {
        since(&self.activity, ts, |e| e.at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::ActivityKind;
    use chrono::Duration;

    fn chat(at: DateTime<Utc>, message: &str) -> ServerEvent {
        ServerEvent::Chat(ChatEvent {
            at,
            player: "Steve".to_string(),
            message: message.to_string(),
        })
    }

    #[test]
    fn test_bounded_and_filtered() {
        let journal = EventJournal::new(2);
        let t0 = Utc::now();
        journal.record(&chat(t0, "one"));
        journal.record(&chat(t0 + Duration::seconds(1), "two"));
        journal.record(&chat(t0 + Duration::seconds(2), "three"));
        let all: Vec<String> = journal.chat_since(None).into_iter().map(|c| c.message).collect();
        assert_eq!(all, vec!["two", "three"]);
        let recent = journal.chat_since(Some(t0 + Duration::seconds(2)));
        assert_eq!(recent.len(), 1);
    }

    #[test]
    fn test_activity_kept_separately() {
        let journal = EventJournal::default();
        journal.record(&ServerEvent::Activity(ActivityEvent {
            at: Utc::now(),
            kind: ActivityKind::Join,
            player: "Alex".to_string(),
        }));
        assert!(journal.chat_since(None).is_empty());
        assert_eq!(journal.activity_since(None)[0].player, "Alex");
    }
}
