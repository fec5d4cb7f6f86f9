use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

pub const GREETING: &str = "Ask me a question and I can answer you with a SQL Query!";
pub const ASSISTANT_AVATAR: &str = "🤖";
pub const AVATARS: [&str; 6] = ["🐶", "🐼", "👾", "⭐", "🦄", "🌈"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Sql,
    Explanation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub kind: MessageKind,
    pub content: String,
    pub avatar: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatSession {
    pub id: Uuid,
    pub user_name: String,
    pub avatar: String,
    pub messages: Vec<ChatMessage>,
    /// Set once an answer exists that can be explained
    pub explanation_ready: bool,
    pub last_question: Option<String>,
    pub last_response: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SessionError {
    EmptyName,
    UnknownAvatar(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::EmptyName => write!(f, "Please enter your name"),
            SessionError::UnknownAvatar(a) => write!(f, "Unknown avatar: {}", a),
        }
    }
}

impl ChatSession {
    pub fn new(user_name: &str, avatar: &str) -> Result<Self, SessionError> {
        let user_name = user_name.trim();
        if user_name.is_empty() {
            return Err(SessionError::EmptyName);
        }
        if !AVATARS.contains(&avatar) {
            return Err(SessionError::UnknownAvatar(avatar.to_string()));
        }

        let mut session = Self {
            id: Uuid::new_v4(),
            user_name: user_name.to_string(),
            avatar: avatar.to_string(),
            messages: Vec::new(),
            explanation_ready: false,
            last_question: None,
            last_response: None,
        };
        session.push_assistant(MessageKind::Text, GREETING);
        Ok(session)
    }

    pub fn push_user(&mut self, content: &str) {
        let avatar = self.avatar.clone();
        self.messages.push(ChatMessage {
            role: Role::User,
            kind: MessageKind::Text,
            content: content.to_string(),
            avatar,
            created_at: Utc::now(),
        });
    }

    pub fn push_assistant(&mut self, kind: MessageKind, content: &str) {
        self.messages.push(ChatMessage {
            role: Role::Assistant,
            kind,
            content: content.to_string(),
            avatar: ASSISTANT_AVATAR.to_string(),
            created_at: Utc::now(),
        });
    }

    /// Stores a model answer to `question` and unlocks explanations.
    pub fn record_answer(&mut self, question: &str, response: &str) {
        self.push_assistant(MessageKind::Sql, response);
        self.last_question = Some(question.to_string());
        self.last_response = Some(response.to_string());
        self.explanation_ready = true;
    }

    /// The (question, answer) pair an explanation would be about.
    pub fn can_explain(&self) -> Option<(&str, &str)> {
        if !self.explanation_ready {
            return None;
        }
        match (&self.last_question, &self.last_response) {
            (Some(q), Some(r)) => Some((q.as_str(), r.as_str())),
            _ => None,
        }
    }

    /// Whether the last message still waits for an assistant reply.
    pub fn awaiting_reply(&self) -> bool {
        self.messages
            .last()
            .is_some_and(|m| m.role == Role::User)
    }
}

struct Entry {
    session: ChatSession,
    last_seen: Instant,
    // Monotonic use counter, orders entries for eviction
    tick: u64,
}

/// In-memory sessions keyed by id. Sessions idle for longer than the TTL
/// are dropped, and the least recently used one makes room once the store
/// is full.
pub struct SessionStore {
    sessions: RwLock<HashMap<Uuid, Entry>>,
    ttl: Duration,
    capacity: usize,
    clock: AtomicU64,
}

impl SessionStore {
    pub fn with_limits(ttl: Duration, capacity: usize) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn insert(&self, session: ChatSession) -> ChatSession {
        let snapshot = session.clone();
        let mut sessions = self.sessions.write().await;

        let before = sessions.len();
        sessions.retain(|_, entry| entry.last_seen.elapsed() < self.ttl);
        if sessions.len() < before {
            debug!("Expired {} idle sessions", before - sessions.len());
        }

        while sessions.len() >= self.capacity {
            let Some(oldest) = sessions
                .iter()
                .min_by_key(|(_, entry)| entry.tick)
                .map(|(id, _)| *id)
            else {
                break;
            };
            sessions.remove(&oldest);
            debug!("Session store full, evicted {}", oldest);
        }

        let entry = Entry {
            session,
            last_seen: Instant::now(),
            tick: self.tick(),
        };
        sessions.insert(snapshot.id, entry);
        snapshot
    }

    pub async fn get(&self, id: &Uuid) -> Option<ChatSession> {
        self.update(id, |session| session.clone()).await
    }

    /// Applies `f` to a live session under the write lock. An expired session
    /// is removed and reported as missing.
    pub async fn update<T>(&self, id: &Uuid, f: impl FnOnce(&mut ChatSession) -> T) -> Option<T> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(id)?;
        if entry.last_seen.elapsed() >= self.ttl {
            sessions.remove(id);
            debug!("Session {} expired", id);
            return None;
        }

        entry.last_seen = Instant::now();
        entry.tick = self.tick();
        Some(f(&mut entry.session))
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
