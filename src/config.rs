//! Session configuration.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{MuxError, Result, MAX_PAYLOAD};

/// Default initial capacity of the stream table.
pub const DEFAULT_CAPACITY: usize = 64;

/// Which end of the transport a session is. Only affects stream-id parity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Allocates even stream ids: 2, 4, 6, ...
    #[default]
    Initiator,
    /// Allocates odd stream ids: 3, 5, 7, ...
    Acceptor,
}

impl Role {
    /// Value of the id counter before the first allocation.
    pub(crate) fn id_seed(self) -> u32 {
        match self {
            Role::Initiator => 0,
            Role::Acceptor => 1,
        }
    }
}

/// Configuration for a [`Session`](crate::Session).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub role: Role,
    /// Accept-queue capacity. 0 means a stream is handed over only when
    /// `accept()` takes it, and the dispatch task waits until then.
    pub backlog: usize,
    /// Initial capacity hint for the stream table.
    pub capacity: usize,
    /// Accepted for compatibility and validated, but not applied: frames are
    /// always fragmented at 65535 payload bytes.
    pub max_frame_size: Option<usize>,
    /// Rolling XOR key. Obfuscation only, see [`crate::obfuscate`].
    pub key: Option<Vec<u8>>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::Initiator,
            backlog: 0,
            capacity: DEFAULT_CAPACITY,
            max_frame_size: None,
            key: None,
        }
    }
}

impl Config {
    pub fn initiator() -> Self {
        Self::default()
    }

    pub fn acceptor() -> Self {
        Self {
            role: Role::Acceptor,
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_backlog(mut self, backlog: usize) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = Some(size);
        self
    }

    pub fn with_key(mut self, key: impl Into<Vec<u8>>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Parse a JSON document; missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values a session cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(MuxError::InvalidConfig(
                "capacity must be greater than zero".into(),
            ));
        }

        if let Some(size) = self.max_frame_size {
            if size == 0 || size > MAX_PAYLOAD {
                return Err(MuxError::InvalidConfig(format!(
                    "max_frame_size must be within 1..={}, got {}",
                    MAX_PAYLOAD, size
                )));
            }
        }

        if matches!(&self.key, Some(key) if key.is_empty()) {
            return Err(MuxError::InvalidConfig(
                "obfuscation key must not be empty".into(),
            ));
        }

        Ok(())
    }
}

// Keeps the key out of logs.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("role", &self.role)
            .field("backlog", &self.backlog)
            .field("capacity", &self.capacity)
            .field("max_frame_size", &self.max_frame_size)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
