//! In-memory store for tests and local runs without PostgreSQL.
//!
//! Enforces the same referential rule as the database: a message can only be
//! inserted into an existing session. Failures can be injected per operation.

use super::store::{HealthProbe, ProfileDirectory, SessionStore, StoreError, UsageStore};
use crate::models::{ChatMessage, ChatSession, NewChatMessage, NewChatSession, UsageRecord};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Default)]
struct State {
    sessions: HashMap<String, ChatSession>,
    messages: Vec<ChatMessage>,
    usage: HashMap<String, UsageRecord>,
    profiles: HashMap<String, String>,

    next_message_id: i64,
    session_creations: u32,
    usage_writes: u32,
    message_attempts: u32,

    unavailable: bool,
    message_failures: VecDeque<StoreError>,
    create_failures: VecDeque<StoreError>,
    title_failures: VecDeque<StoreError>,
    /// Create the session but report a unique conflict, as a racing writer would.
    conflict_on_create: bool,
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_available(state: &State) -> Result<(), StoreError> {
        if state.unavailable {
            Err(StoreError::Unavailable("in-memory store offline".to_string()))
        } else {
            Ok(())
        }
    }

    // Seeding

    pub fn with_profile(self, user_id: &str, role: &str) -> Self {
        self.lock()
            .profiles
            .insert(user_id.to_string(), role.to_string());
        self
    }

    pub fn with_usage(self, user_id: &str, question_count: i32) -> Self {
        self.lock()
            .usage
            .insert(user_id.to_string(), UsageRecord::new(user_id, question_count));
        self
    }

    pub fn with_session(self, session_id: &str, owner_id: &str, title: &str) -> Self {
        let now = Utc::now();
        self.lock().sessions.insert(
            session_id.to_string(),
            ChatSession {
                id: session_id.to_string(),
                owner_id: owner_id.to_string(),
                title: title.to_string(),
                locale: None,
                created_at: now,
                updated_at: now,
            },
        );
        self
    }

    // Failure injection

    /// Make every operation fail with `Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Fail the next message inserts with these errors, in order.
    pub fn fail_message_inserts(&self, errors: impl IntoIterator<Item = StoreError>) {
        self.lock().message_failures.extend(errors);
    }

    pub fn fail_session_creates(&self, errors: impl IntoIterator<Item = StoreError>) {
        self.lock().create_failures.extend(errors);
    }

    pub fn fail_title_updates(&self, errors: impl IntoIterator<Item = StoreError>) {
        self.lock().title_failures.extend(errors);
    }

    pub fn conflict_on_create(&self, conflict: bool) {
        self.lock().conflict_on_create = conflict;
    }

    // Inspection

    pub fn session(&self, session_id: &str) -> Option<ChatSession> {
        self.lock().sessions.get(session_id).cloned()
    }

    /// Messages of a session in insertion order.
    pub fn messages(&self, session_id: &str) -> Vec<ChatMessage> {
        self.lock()
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn usage(&self, user_id: &str) -> Option<i32> {
        self.lock().usage.get(user_id).map(|r| r.question_count)
    }

    /// Successful session creations.
    pub fn session_creations(&self) -> u32 {
        self.lock().session_creations
    }

    /// Inserts and updates of usage records.
    pub fn usage_writes(&self) -> u32 {
        self.lock().usage_writes
    }

    /// Message insert calls, successful or not.
    pub fn message_attempts(&self) -> u32 {
        self.lock().message_attempts
    }
}

#[async_trait]
impl UsageStore for InMemoryStore {
    async fn fetch_usage(&self, user_id: &str) -> Result<Option<UsageRecord>, StoreError> {
        let state = self.lock();
        Self::check_available(&state)?;
        Ok(state.usage.get(user_id).cloned())
    }

    async fn insert_usage(&self, user_id: &str, question_count: i32) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        if state.usage.contains_key(user_id) {
            return Err(StoreError::Conflict(format!("usage record {}", user_id)));
        }
        state
            .usage
            .insert(user_id.to_string(), UsageRecord::new(user_id, question_count));
        state.usage_writes += 1;
        Ok(())
    }

    async fn update_usage(&self, user_id: &str, question_count: i32) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        let record = state
            .usage
            .get_mut(user_id)
            .ok_or_else(|| StoreError::Other(format!("no usage record for {}", user_id)))?;
        record.question_count = question_count;
        record.updated_at = Utc::now();
        state.usage_writes += 1;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn insert_message(&self, message: &NewChatMessage) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.message_attempts += 1;
        Self::check_available(&state)?;
        if let Some(err) = state.message_failures.pop_front() {
            return Err(err);
        }
        if !state.sessions.contains_key(&message.session_id) {
            return Err(StoreError::missing_session());
        }

        state.next_message_id += 1;
        let id = state.next_message_id;
        state.messages.push(ChatMessage {
            id,
            session_id: message.session_id.clone(),
            role: message.role.as_str().to_string(),
            content: message.content.clone(),
            created_at: Utc::now(),
        });
        Ok(())
    }

    async fn create_session(&self, session: &NewChatSession) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        if let Some(err) = state.create_failures.pop_front() {
            return Err(err);
        }
        if state.sessions.contains_key(&session.id) {
            return Err(StoreError::Conflict(format!("session {}", session.id)));
        }

        let now = Utc::now();
        state.sessions.insert(
            session.id.clone(),
            ChatSession {
                id: session.id.clone(),
                owner_id: session.owner_id.clone(),
                title: session.title.clone(),
                locale: session.locale.clone(),
                created_at: now,
                updated_at: now,
            },
        );
        state.session_creations += 1;

        if state.conflict_on_create {
            return Err(StoreError::Conflict(format!("session {}", session.id)));
        }
        Ok(())
    }

    async fn session_owner(&self, session_id: &str) -> Result<Option<String>, StoreError> {
        let state = self.lock();
        Self::check_available(&state)?;
        Ok(state.sessions.get(session_id).map(|s| s.owner_id.clone()))
    }

    async fn touch_session(&self, session_id: &str, owner_id: &str) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        if let Some(session) = state
            .sessions
            .get_mut(session_id)
            .filter(|s| s.owner_id == owner_id)
        {
            session.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_session_title(
        &self,
        session_id: &str,
        owner_id: &str,
        title: &str,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        Self::check_available(&state)?;
        if let Some(err) = state.title_failures.pop_front() {
            return Err(err);
        }
        if let Some(session) = state
            .sessions
            .get_mut(session_id)
            .filter(|s| s.owner_id == owner_id)
        {
            session.title = title.to_string();
        }
        Ok(())
    }
}

#[async_trait]
impl ProfileDirectory for InMemoryStore {
    async fn fetch_profile_role(&self, user_id: &str) -> Result<Option<String>, StoreError> {
        let state = self.lock();
        Self::check_available(&state)?;
        Ok(state.profiles.get(user_id).cloned())
    }
}

#[async_trait]
impl HealthProbe for InMemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Self::check_available(&self.lock())
    }
}
