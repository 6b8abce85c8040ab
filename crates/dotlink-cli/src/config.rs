use anyhow::{Context, Result};
use dotlink_core::policy::EnginePolicy;
use std::fs;
use std::path::Path;

/// Resolve the effective engine policy: built-in defaults, optionally
/// overridden wholesale by a TOML file. Absent keys keep their defaults.
pub fn load_policy(path: Option<&Path>) -> Result<EnginePolicy> {
    match path {
        None => Ok(EnginePolicy::default()),
        Some(path) => {
            let text = fs::read_to_string(path).with_context(|| format!("reading policy file {}", path.display()))?;
            let policy = toml::from_str(&text).with_context(|| format!("parsing policy file {}", path.display()))?;
            Ok(policy)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_policy_without_file() {
        let policy = load_policy(None).unwrap();
        assert!(policy.archive_call_sites);
    }

    #[test]
    fn test_partial_policy_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "archive_call_sites = false").unwrap();
        let policy = load_policy(Some(file.path())).unwrap();
        assert!(!policy.archive_call_sites);
        assert!(!policy.essential_classes.is_empty());
    }

    #[test]
    fn test_malformed_policy_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "archive_call_sites = \"maybe\"").unwrap();
        assert!(load_policy(Some(file.path())).is_err());
    }
}
