//! Scrubs secret values from captured text.

use super::SecretBinding;

/// Replacement for redacted values.
pub const REDACTED: &str = "***";

/// Replaces every occurrence of every non-empty bound secret with `***`.
#[derive(Clone, Default)]
pub struct Redactor {
    // Longest first, so a secret containing another is replaced whole.
    values: Vec<String>,
}

impl Redactor {
    /// Builds a redactor from a stage's bindings.
    #[must_use]
    pub fn new(bindings: &[SecretBinding]) -> Self {
        let mut values: Vec<String> = bindings
            .iter()
            .map(|b| b.value.expose())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .collect();
        values.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        values.dedup();
        Self { values }
    }

    /// Returns `text` with secrets replaced.
    #[must_use]
    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for value in &self.values {
            if out.contains(value.as_str()) {
                out = out.replace(value.as_str(), REDACTED);
            }
        }
        out
    }
}

impl std::fmt::Debug for Redactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redactor").field("values", &self.values.len()).finish()
    }
}
