//! Persistence seam for registered entities.
//!
//! The core only ever talks to [`RegistrationStore`]; what sits behind it
//! (a relational database in production, [`MemoryStore`] here and in tests)
//! is somebody else's problem. Calls are synchronous from the core's point
//! of view and are issued *before* the in-memory mutation, so a refusal
//! leaves the domain model untouched.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend: {0}")]
    Backend(String),

    #[error("no such row: {0}")]
    Missing(&'static str),
}

/// Persisted form of a registered channel, privilege records included
/// (they live and die with the channel row).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRow {
    pub id: u32,
    pub parent_id: u32,
    pub name: String,
    pub topic: String,
    pub description: String,
    pub flags: u16,
    pub max_users: u16,
    pub sort_order: u16,
    pub password: String,
    pub privileges: Vec<ChannelPrivilegeRow>,
}

/// One persisted privilege grant: a registration's rights in one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelPrivilegeRow {
    pub registration_id: u32,
    pub privileges: u16,
}

/// Persisted form of a registered player identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationRow {
    pub id: u32,
    pub name: String,
    pub password: String,
    pub server_admin: bool,
}

/// Everything the store knows, read once at startup.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub channels: Vec<ChannelRow>,
    pub registrations: Vec<RegistrationRow>,
}

pub trait RegistrationStore: Send {
    fn load_all(&mut self) -> Result<StoreSnapshot, StoreError>;

    fn register_channel(&mut self, row: &ChannelRow) -> Result<(), StoreError>;
    fn update_channel(&mut self, row: &ChannelRow) -> Result<(), StoreError>;
    fn unregister_channel(&mut self, id: u32) -> Result<(), StoreError>;

    fn register_player(&mut self, row: &RegistrationRow) -> Result<(), StoreError>;
    fn update_player(&mut self, row: &RegistrationRow) -> Result<(), StoreError>;
    fn unregister_player(&mut self, id: u32) -> Result<(), StoreError>;
}

/// In-memory reference store. Also the test double: it can be pre-seeded
/// and told to refuse the next write.
#[derive(Default)]
pub struct MemoryStore {
    channels: HashMap<u32, ChannelRow>,
    registrations: HashMap<u32, RegistrationRow>,
    fail_next: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_channel(&mut self, row: ChannelRow) {
        self.channels.insert(row.id, row);
    }

    pub fn seed_registration(&mut self, row: RegistrationRow) {
        self.registrations.insert(row.id, row);
    }

    /// Make the next write fail, for rollback tests.
    pub fn fail_next(&mut self, why: &str) {
        self.fail_next = Some(why.to_owned());
    }

    pub fn channel_rows(&self) -> Vec<&ChannelRow> {
        let mut rows: Vec<_> = self.channels.values().collect();
        rows.sort_by_key(|r| r.id);
        rows
    }

    pub fn registration_rows(&self) -> Vec<&RegistrationRow> {
        let mut rows: Vec<_> = self.registrations.values().collect();
        rows.sort_by_key(|r| r.id);
        rows
    }

    fn gate(&mut self) -> Result<(), StoreError> {
        match self.fail_next.take() {
            Some(why) => Err(StoreError::Backend(why)),
            None => Ok(()),
        }
    }
}

impl RegistrationStore for MemoryStore {
    fn load_all(&mut self) -> Result<StoreSnapshot, StoreError> {
        self.gate()?;
        let mut channels: Vec<_> = self.channels.values().cloned().collect();
        channels.sort_by_key(|r| r.id);
        let mut registrations: Vec<_> = self.registrations.values().cloned().collect();
        registrations.sort_by_key(|r| r.id);
        Ok(StoreSnapshot { channels, registrations })
    }

    fn register_channel(&mut self, row: &ChannelRow) -> Result<(), StoreError> {
        self.gate()?;
        self.channels.insert(row.id, row.clone());
        Ok(())
    }

    fn update_channel(&mut self, row: &ChannelRow) -> Result<(), StoreError> {
        self.gate()?;
        if !self.channels.contains_key(&row.id) {
            return Err(StoreError::Missing("channel"));
        }
        self.channels.insert(row.id, row.clone());
        Ok(())
    }

    fn unregister_channel(&mut self, id: u32) -> Result<(), StoreError> {
        self.gate()?;
        self.channels.remove(&id).map(|_| ()).ok_or(StoreError::Missing("channel"))
    }

    fn register_player(&mut self, row: &RegistrationRow) -> Result<(), StoreError> {
        self.gate()?;
        self.registrations.insert(row.id, row.clone());
        Ok(())
    }

    fn update_player(&mut self, row: &RegistrationRow) -> Result<(), StoreError> {
        self.gate()?;
        if !self.registrations.contains_key(&row.id) {
            return Err(StoreError::Missing("registration"));
        }
        self.registrations.insert(row.id, row.clone());
        Ok(())
    }

    fn unregister_player(&mut self, id: u32) -> Result<(), StoreError> {
        self.gate()?;
        self.registrations.remove(&id).map(|_| ()).ok_or(StoreError::Missing("registration"))
    }
}
