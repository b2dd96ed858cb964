use crate::naming::NamingScope;
use crate::schema::ddl::{AnsiDialect, Dialect};
use log::warn;
use std::env;
use std::fmt;
use std::sync::Arc;

/// Global settings of a [`crate::PersistenceContext`].
#[derive(Clone)]
pub struct PersistenceConfig {
    /// Global naming strategies, the last fallback of every mapping scope
    pub naming: NamingScope,

    /// Dialect rendering statements for logging
    pub dialect: Arc<dyn Dialect>,

    /// Longest identifier the database accepts. Longer foreign key names are
    /// replaced by a hash.
    pub max_identifier_length: usize,

    /// Maximum number of values in one `IN` list of a batched select
    pub in_clause_size: usize,

    /// Log every statement through the `relmap::sql` target
    pub log_statements: bool,

    /// Pool size of hi-lo sequences declared without one
    pub hilo_pool_size: i64,
}

impl PersistenceConfig {
    pub fn new() -> Self {
        Self {
            naming: NamingScope::defaults(),
            dialect: Arc::new(AnsiDialect::new()),
            max_identifier_length: 64,
            in_clause_size: 100,
            log_statements: false,
            hilo_pool_size: 50,
        }
    }

    pub fn naming(mut self, naming: NamingScope) -> Self {
        self.naming = naming.over(&NamingScope::defaults());
        self
    }

    pub fn dialect(mut self, dialect: impl Dialect + 'static) -> Self {
        self.dialect = Arc::new(dialect);
        self
    }

    pub fn max_identifier_length(mut self, length: usize) -> Self {
        self.max_identifier_length = length;
        self
    }

    pub fn in_clause_size(mut self, size: usize) -> Self {
        self.in_clause_size = size;
        self
    }

    pub fn log_statements(mut self, enabled: bool) -> Self {
        self.log_statements = enabled;
        self
    }

    pub fn hilo_pool_size(mut self, size: i64) -> Self {
        self.hilo_pool_size = size;
        self
    }

    /// Defaults overridden by `RELMAP_LOG_STATEMENTS`, `RELMAP_IN_CLAUSE_SIZE`
    /// and `RELMAP_MAX_IDENTIFIER_LENGTH`. Unparsable values are ignored with
    /// a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new();
        if let Some(raw) = lookup("RELMAP_LOG_STATEMENTS") {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => config.log_statements = true,
                "0" | "false" | "no" | "off" => config.log_statements = false,
                other => warn!("Ignoring RELMAP_LOG_STATEMENTS={}", other),
            }
        }
        if let Some(raw) = lookup("RELMAP_IN_CLAUSE_SIZE") {
            match raw.trim().parse() {
                Ok(size) => config.in_clause_size = size,
                Err(_) => warn!("Ignoring RELMAP_IN_CLAUSE_SIZE={}", raw),
            }
        }
        if let Some(raw) = lookup("RELMAP_MAX_IDENTIFIER_LENGTH") {
            match raw.trim().parse() {
                Ok(length) => config.max_identifier_length = length,
                Err(_) => warn!("Ignoring RELMAP_MAX_IDENTIFIER_LENGTH={}", raw),
            }
        }
        config
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.in_clause_size == 0 {
            return Err("in_clause_size must be > 0".to_string());
        }
        if self.max_identifier_length < 8 {
            return Err("max_identifier_length must be >= 8".to_string());
        }
        if self.hilo_pool_size <= 0 {
            return Err("hilo_pool_size must be > 0".to_string());
        }
        Ok(())
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PersistenceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceConfig")
            .field("naming", &self.naming)
            .field("max_identifier_length", &self.max_identifier_length)
            .field("in_clause_size", &self.in_clause_size)
            .field("log_statements", &self.log_statements)
            .field("hilo_pool_size", &self.hilo_pool_size)
            .finish()
    }
}
