//! XDG Base Directory paths for warden.
//!
//! The CLI resolves the default policy file and audit log here, so both
//! land in the same places on every platform.

use std::path::PathBuf;

const APP: &str = "warden";

/// Get the warden config directory.
///
/// Returns `$XDG_CONFIG_HOME/warden` if set, otherwise `~/.config/warden`.
///
/// # Examples
///
/// ```
/// use warden_paths::config_dir;
///
/// let policy = config_dir().join("policy.toml");
/// ```
pub fn config_dir() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config")
}

/// Get the warden data directory.
///
/// Returns `$XDG_DATA_HOME/warden` if set, otherwise `~/.local/share/warden`.
pub fn data_dir() -> PathBuf {
    xdg_dir("XDG_DATA_HOME", ".local/share")
}

/// Default policy file: `<config_dir>/policy.toml`.
pub fn policy_file() -> PathBuf {
    config_dir().join("policy.toml")
}

/// Default audit log: `<data_dir>/audit.jsonl`.
pub fn audit_log_file() -> PathBuf {
    data_dir().join("audit.jsonl")
}

fn xdg_dir(var: &str, fallback: &str) -> PathBuf {
    match std::env::var_os(var) {
        Some(base) if !base.is_empty() => PathBuf::from(base).join(APP),
        _ => match dirs::home_dir() {
            Some(home) => home.join(fallback).join(APP),
            None => PathBuf::from(fallback).join(APP),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_end_with_warden() {
        assert!(config_dir().ends_with("warden"));
        assert!(data_dir().ends_with("warden"));
    }

    #[test]
    fn test_default_files() {
        assert!(policy_file().ends_with("warden/policy.toml"));
        assert!(audit_log_file().ends_with("warden/audit.jsonl"));
    }

    #[test]
    fn test_xdg_override() {
        unsafe {
            std::env::set_var("WARDEN_TEST_XDG", "/tmp/test-xdg");
        }
        assert_eq!(
            xdg_dir("WARDEN_TEST_XDG", ".config"),
            PathBuf::from("/tmp/test-xdg/warden")
        );
        unsafe {
            std::env::remove_var("WARDEN_TEST_XDG");
        }
        assert!(xdg_dir("WARDEN_TEST_XDG", ".config").ends_with(".config/warden"));
    }
}
