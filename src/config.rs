use crate::error::{CombeeError, Result};
use crate::paged::DEFAULT_BATCH_SIZE;

/// Where to connect and which queues to introspect.
#[derive(Debug, Clone)]
pub struct Config {
    pub uri: Option<String>,
    pub queues: Vec<String>,
    /// Look up queue names in the store when `queues` is empty.
    pub discover: bool,
    /// CA file for TLS connections.
    pub cert_file: Option<String>,
    pub batch_size: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            uri: None,
            queues: Vec::new(),
            discover: false,
            cert_file: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl Config {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            ..Self::default()
        }
    }

    pub fn with_queues<I, Q>(mut self, queues: I) -> Self
    where
        I: IntoIterator<Item = Q>,
        Q: Into<String>,
    {
        self.queues = queues.into_iter().map(Into::into).collect();
        self
    }

    /// Checks everything that can be checked without touching the network.
    ///
    /// Queue names that collide with shell keywords are rejected, since the
    /// shell could never address them.
    pub fn validate(&self) -> Result<&str> {
        let uri = match self.uri.as_deref().map(str::trim) {
            Some(uri) if !uri.is_empty() => uri,
            _ => {
                return Err(CombeeError::Configuration(
                    "must provide a MongoDB URI".to_string(),
                ))
            }
        };
        if self.queues.iter().any(|queue| queue.trim().is_empty()) {
            return Err(CombeeError::Configuration(
                "queue names must not be empty".to_string(),
            ));
        }
        if let Some(queue) = self.queues.iter().find(|queue| is_reserved(queue)) {
            return Err(CombeeError::Configuration(format!(
                "queue name {queue:?} is a shell keyword"
            )));
        }
        if self.queues.is_empty() && !self.discover {
            return Err(CombeeError::Configuration(
                "must provide queues or enable discovery".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(CombeeError::Configuration(
                "batch size must be positive".to_string(),
            ));
        }
        Ok(uri)
    }
}

/// Words the shell reads as commands rather than queue names.
pub const RESERVED_QUEUE_NAMES: [&str; 4] = ["help", "exit", "quit", "queues"];

pub(crate) fn is_reserved(queue: &str) -> bool {
    RESERVED_QUEUE_NAMES.contains(&queue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn needs_a_uri() {
        let config = Config::default().with_queues(["mail"]);
        assert!(matches!(
            config.validate(),
            Err(CombeeError::Configuration(_))
        ));
        let config = Config {
            uri: Some("  ".into()),
            ..config
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn needs_queues_unless_discovering() {
        let config = Config::new("mongodb://localhost");
        assert!(matches!(
            config.validate(),
            Err(CombeeError::Configuration(_))
        ));

        let config = Config {
            discover: true,
            ..config
        };
        assert_eq!(config.validate().unwrap(), "mongodb://localhost");
    }

    #[test]
    fn rejects_blank_queue_names_and_zero_batches() {
        let config = Config::new("mongodb://localhost").with_queues(["mail", ""]);
        assert!(config.validate().is_err());

        let config = Config {
            batch_size: 0,
            ..Config::new("mongodb://localhost").with_queues(["mail"])
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_queue_names_the_shell_reads_as_commands() {
        for name in RESERVED_QUEUE_NAMES {
            let config = Config::new("mongodb://localhost").with_queues(["mail", name]);
            assert!(matches!(
                config.validate(),
                Err(CombeeError::Configuration(message)) if message.contains(name)
            ));
        }
        let config = Config::new("mongodb://localhost").with_queues(["help-desk"]);
        assert!(config.validate().is_ok());
    }
}
