//! Binds a stage's secret references to values.

use super::{SecretStore, SecretValue};
use crate::errors::MissingSecretError;
use crate::pipeline::StageSpec;

/// A secret resolved for one stage run.
#[derive(Debug, Clone)]
pub struct SecretBinding {
    /// Secret name.
    pub name: String,
    /// Environment variable that receives the value.
    pub env: String,
    /// The value.
    pub value: SecretValue,
}

/// Resolves [`SecretRef`](crate::pipeline::SecretRef)s against a store.
pub struct SecretInjector;

impl SecretInjector {
    /// Produces one binding per secret reference of `stage`.
    ///
    /// # Errors
    ///
    /// Returns [`MissingSecretError`] for the first reference with no value.
    /// Empty values are allowed.
    pub fn bind(stage: &StageSpec, store: &SecretStore) -> Result<Vec<SecretBinding>, MissingSecretError> {
        stage
            .secrets
            .iter()
            .map(|secret| {
                let value = store
                    .get(&secret.name)
                    .ok_or_else(|| MissingSecretError::new(&stage.name, &secret.name))?;
                Ok(SecretBinding {
                    name: secret.name.clone(),
                    env: secret.env.clone(),
                    value: value.clone(),
                })
            })
            .collect()
    }
}
