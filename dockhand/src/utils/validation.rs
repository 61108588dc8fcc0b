//! Validation helpers for stage definitions.

use regex::Regex;
use std::sync::LazyLock;

static ENV_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("environment variable pattern is valid")
});

/// Returns true if `name` can be used as an environment variable name.
#[must_use]
pub fn is_valid_env_name(name: &str) -> bool {
    ENV_NAME.is_match(name)
}

/// Returns true for absolute POSIX paths, the only form accepted inside an
/// execution environment.
#[must_use]
pub fn is_absolute_container_path(path: &str) -> bool {
    path.starts_with('/')
}
