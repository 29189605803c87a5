//! Effective queue names: `<prefix>-<name>`, with a default name fallback.

use crate::error::ConnectionError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueNaming {
    prefix: String,
    default_queue: String,
}

impl QueueNaming {
    pub fn new(prefix: impl Into<String>, default_queue: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            default_queue: default_queue.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
    }

    pub fn default_queue(&self) -> &str {
        &self.default_queue
    }

    pub fn set_default_queue(&mut self, name: impl Into<String>) {
        self.default_queue = name.into();
    }

    /// Resolve the broker-side queue name for `name`.
    ///
    /// An empty `name` falls back to the default queue; if that is empty too
    /// the call fails with [`ConnectionError::MissingQueueName`].
    pub fn resolve(&self, name: &str) -> Result<String, ConnectionError> {
        let name = if name.is_empty() {
            self.default_queue.as_str()
        } else {
            name
        };

        if name.is_empty() {
            return Err(ConnectionError::MissingQueueName);
        }

        if self.prefix.is_empty() {
            Ok(name.to_string())
        } else {
            Ok(format!("{}-{}", self.prefix, name))
        }
    }
}
