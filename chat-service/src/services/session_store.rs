//! In-memory conversation windows keyed by session token.

use crate::models::ChatMessage;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

/// Persona every new session is seeded with.
pub const SYSTEM_PROMPT: &str = "You are DumbGPT, an AI assistant that deliberately gives unhelpful, \
nonsensical, rude, and comically wrong answers while maintaining a confident tone. Like you're a \
stupid young brother. Be drama queen and passive aggressive. Keep answers short and to the point.";

#[derive(Debug)]
struct Session {
    messages: Vec<ChatMessage>,
    last_active: DateTime<Utc>,
}

/// Sliding-window message store.
///
/// Position 0 of every session is the system prompt and is never evicted;
/// behind it at most `window` messages are kept, oldest dropped first.
#[derive(Debug)]
pub struct SessionStore {
    sessions: DashMap<String, Session>,
    system_prompt: String,
    window: usize,
}

impl SessionStore {
    pub fn new(system_prompt: impl Into<String>, window: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            system_prompt: system_prompt.into(),
            window,
        }
    }

    fn seed(&self) -> Session {
        Session {
            messages: vec![ChatMessage::system(self.system_prompt.clone())],
            last_active: Utc::now(),
        }
    }

    /// Current window for `session_id`, creating the session on first use.
    pub fn get_or_create(&self, session_id: &str) -> Vec<ChatMessage> {
        let mut session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| self.seed());
        session.last_active = Utc::now();
        session.messages.clone()
    }

    /// Append to the tail, trim to the window and return the resulting window.
    pub fn append(&self, session_id: &str, message: ChatMessage) -> Vec<ChatMessage> {
        let mut session = self
            .sessions
            .entry(session_id.to_string())
            .or_insert_with(|| self.seed());

        session.messages.push(message);
        let len = session.messages.len();
        if len > self.window + 1 {
            session.messages.drain(1..len - self.window);
        }
        session.last_active = Utc::now();
        session.messages.clone()
    }

    /// Drop sessions idle since before `cutoff`. Returns how many went.
    pub fn evict_idle(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, session| session.last_active >= cutoff);
        before.saturating_sub(self.sessions.len())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::Duration;

    #[test]
    fn new_session_holds_only_system_prompt() {
        let store = SessionStore::new("persona", 4);
        let window = store.get_or_create("s1");

        assert_eq!(window, vec![ChatMessage::system("persona")]);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn window_keeps_system_plus_most_recent() {
        let store = SessionStore::new("persona", 4);

        for i in 0..10 {
            store.append("s1", ChatMessage::user(format!("m{}", i)));
        }
        let window = store.get_or_create("s1");

        assert_eq!(window.len(), 5);
        assert_eq!(window[0].role, Role::System);
        let tail: Vec<_> = window[1..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(tail, vec!["m6", "m7", "m8", "m9"]);
    }

    #[test]
    fn window_never_exceeds_cap_at_any_step() {
        let store = SessionStore::new("persona", 3);

        for i in 0..8 {
            let window = store.append("s1", ChatMessage::user(i.to_string()));
            assert_eq!(window.len(), (i + 2).min(4));
            assert_eq!(window[0], ChatMessage::system("persona"));
            assert_eq!(window.last().unwrap().content, i.to_string());
        }
    }

    #[test]
    fn zero_window_keeps_only_system() {
        let store = SessionStore::new("persona", 0);
        let window = store.append("s1", ChatMessage::user("hi"));
        assert_eq!(window, vec![ChatMessage::system("persona")]);
    }

    #[test]
    fn sessions_are_isolated() {
        let store = SessionStore::new("persona", 4);
        store.append("a", ChatMessage::user("from a"));

        assert_eq!(store.get_or_create("b").len(), 1);
        assert_eq!(store.get_or_create("a").len(), 2);
    }

    #[test]
    fn evicts_idle_sessions() {
        let store = SessionStore::new("persona", 4);
        store.get_or_create("a");
        store.get_or_create("b");

        assert_eq!(store.evict_idle(Utc::now() - Duration::hours(1)), 0);
        assert_eq!(store.evict_idle(Utc::now() + Duration::seconds(1)), 2);
        assert!(store.is_empty());
    }
}
