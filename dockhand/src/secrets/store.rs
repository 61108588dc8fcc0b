//! Secret values and where they come from.

use crate::errors::DockhandError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

/// A secret string.
///
/// `Debug` and `Display` print `***`. The type deliberately has no
/// `Serialize` impl; call [`SecretValue::expose`] at the one place the value
/// is handed to a runtime.
#[derive(Clone, PartialEq, Eq)]
pub struct SecretValue(String);

impl SecretValue {
    /// Wraps a value.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Returns the plain value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true if the value is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

impl fmt::Display for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Where a secret value is read from.
///
/// Written in YAML as a mapping with exactly one key:
/// `{ env: VAR }`, `{ value: literal }` or `{ file: path }`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "SourceFields")]
pub enum SecretSource {
    /// A variable of the dockhand process environment.
    Env(String),
    /// An inline value. Intended for tests and local runs.
    Value(String),
    /// A file whose contents (minus one trailing newline) are the value.
    File(PathBuf),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SourceFields {
    env: Option<String>,
    value: Option<String>,
    file: Option<PathBuf>,
}

impl TryFrom<SourceFields> for SecretSource {
    type Error = String;

    fn try_from(fields: SourceFields) -> Result<Self, Self::Error> {
        match (fields.env, fields.value, fields.file) {
            (Some(var), None, None) => Ok(Self::Env(var)),
            (None, Some(value), None) => Ok(Self::Value(value)),
            (None, None, Some(path)) => Ok(Self::File(path)),
            _ => Err("secret source needs exactly one of 'env', 'value' or 'file'".to_string()),
        }
    }
}

impl SecretSource {
    /// Reads the value.
    ///
    /// Returns `Ok(None)` when an environment variable is unset, so the
    /// stage that references the secret reports it as missing.
    ///
    /// # Errors
    ///
    /// Returns an error if a file source cannot be read.
    pub fn resolve(&self) -> Result<Option<SecretValue>, DockhandError> {
        match self {
            Self::Env(var) => Ok(std::env::var(var).ok().map(SecretValue::new)),
            Self::Value(value) => Ok(Some(SecretValue::new(value.clone()))),
            Self::File(path) => {
                let mut contents = std::fs::read_to_string(path).map_err(|e| {
                    DockhandError::Config(format!("cannot read secret file '{}': {e}", path.display()))
                })?;
                if contents.ends_with('\n') {
                    contents.pop();
                    if contents.ends_with('\r') {
                        contents.pop();
                    }
                }
                Ok(Some(SecretValue::new(contents)))
            }
        }
    }
}

/// Named secret values available to a run.
#[derive(Debug, Clone, Default)]
pub struct SecretStore {
    values: HashMap<String, SecretValue>,
}

impl SecretStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store from name/value pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut store = Self::new();
        for (name, value) in pairs {
            store.insert(name, SecretValue::new(value));
        }
        store
    }

    /// Resolves each source and stores the values that exist.
    ///
    /// # Errors
    ///
    /// Returns an error if any file source cannot be read.
    pub fn resolve<'a>(
        sources: impl IntoIterator<Item = (&'a String, &'a SecretSource)>,
    ) -> Result<Self, DockhandError> {
        let mut store = Self::new();
        for (name, source) in sources {
            match source.resolve()? {
                Some(value) => store.insert(name.clone(), value),
                None => tracing::debug!(secret = %name, "Secret source has no value"),
            }
        }
        Ok(store)
    }

    /// Inserts or replaces a value.
    pub fn insert(&mut self, name: impl Into<String>, value: SecretValue) {
        self.values.insert(name.into(), value);
    }

    /// Looks up a value.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SecretValue> {
        self.values.get(name)
    }

    /// Number of stored secrets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
