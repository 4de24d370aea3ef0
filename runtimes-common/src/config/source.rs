//! Tracking where a configuration value came from.

use std::fmt;

/// Whether an override value was read from the environment.
///
/// `Default` covers both built-in defaults and values already loaded from the
/// config file; the parser only ever sees the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Default,
    Environment,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => write!(f, "default"),
            Self::Environment => write!(f, "environment"),
        }
    }
}

/// A value paired with its origin.
#[derive(Debug, Clone, PartialEq)]
pub struct Sourced<T> {
    pub value: T,
    pub source: ConfigSource,
    /// Environment variable the value was read from, if any.
    pub var: Option<String>,
}

impl<T> Sourced<T> {
    pub fn default_value(value: T) -> Self {
        Self {
            value,
            source: ConfigSource::Default,
            var: None,
        }
    }

    pub fn from_env(value: T, var: String) -> Self {
        Self {
            value,
            source: ConfigSource::Environment,
            var: Some(var),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sourced<U> {
        Sourced {
            value: f(self.value),
            source: self.source,
            var: self.var,
        }
    }

    /// Whether the value was explicitly set in the environment.
    pub fn is_env(&self) -> bool {
        self.source == ConfigSource::Environment
    }

    /// Overwrite `target` when this value came from the environment.
    ///
    /// Returns the variable name that was applied.
    pub fn apply_to(self, target: &mut T) -> Option<String> {
        if self.is_env() {
            *target = self.value;
            self.var
        } else {
            None
        }
    }
}
