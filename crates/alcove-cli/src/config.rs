//! Configuration vault – reads/writes `~/.alcove/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Persisted user configuration stored in `~/.alcove/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Kernel-type key started at launch. Types without a registered
    /// embedded engine would need an external command, so the CLI falls back
    /// to "echo" for unknown keys.
    #[serde(default = "default_kernel_type")]
    pub kernel_type: String,

    /// Transport selector passed to the kernel, e.g. "tcp".
    #[serde(default = "default_transport")]
    pub transport: String,

    /// Bind address passed to the kernel.
    #[serde(default = "default_ip")]
    pub ip: String,

    /// HTTP/WebSocket port of the console host. `0` picks an ephemeral port.
    #[serde(default = "default_console_port")]
    pub console_port: u16,

    /// Record every published kernel event to `runtime/session.jsonl`.
    #[serde(default)]
    pub record_sessions: bool,
}

fn default_kernel_type() -> String {
    "echo".to_string()
}
fn default_transport() -> String {
    "tcp".to_string()
}
fn default_ip() -> String {
    "127.0.0.1".to_string()
}
fn default_console_port() -> u16 {
    alcove_frontend::server::DEFAULT_PORT
}

impl Default for Config {
    fn default() -> Self {
        Self {
            kernel_type: default_kernel_type(),
            transport: default_transport(),
            ip: default_ip(),
            console_port: default_console_port(),
            record_sessions: false,
        }
    }
}

/// Return the path to `~/.alcove/config.toml`.
pub fn config_path() -> PathBuf {
    alcove_dir().join("config.toml")
}

/// Return the runtime directory `~/.alcove/runtime` (connection files,
/// server info, session logs).
pub fn runtime_dir() -> PathBuf {
    alcove_dir().join("runtime")
}

fn alcove_dir() -> PathBuf {
    alcove_dir_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

/// Build the `.alcove` directory path relative to the given home directory.
/// Extracted for testability without mutating environment variables.
pub(crate) fn alcove_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".alcove")
}

/// Load the config from disk. Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &PathBuf) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let mut cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `ALCOVE_*` environment variable overrides to `cfg`.
///
/// Supported variables:
///
/// | Variable | Config field |
/// |---|---|
/// | `ALCOVE_KERNEL_TYPE` | `kernel_type` |
/// | `ALCOVE_IP` | `ip` |
/// | `ALCOVE_CONSOLE_PORT` | `console_port` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("ALCOVE_KERNEL_TYPE") {
        cfg.kernel_type = v;
    }
    if let Ok(v) = std::env::var("ALCOVE_IP") {
        cfg.ip = v;
    }
    if let Ok(v) = std::env::var("ALCOVE_CONSOLE_PORT")
        && let Ok(port) = v.parse::<u16>()
    {
        cfg.console_port = port;
    }
}

/// Save the config to disk, creating `~/.alcove/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &PathBuf) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        // Restrict the config directory to the owner only (rwx------) on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw =
        toml::to_string_pretty(cfg).map_err(|e| format!("Failed to serialize config: {}", e))?;
    // Write the file with owner-only read/write (rw-------) on Unix.
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = alcove_dir_for_home(&dir.path().to_string_lossy()).join("config.toml");

        let cfg = Config::default();
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.kernel_type, "echo");
        assert_eq!(loaded.transport, "tcp");
        assert_eq!(loaded.ip, "127.0.0.1");
        assert!(!loaded.record_sessions);
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn alcove_dir_is_under_home() {
        let p = alcove_dir_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".alcove"));
    }

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = alcove_dir_for_home(&dir.path().to_string_lossy()).join("config.toml");

        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).expect("file meta").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600, "config file must have 0o600 permissions");

        let dir_mode = fs::metadata(path.parent().unwrap())
            .expect("dir meta")
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(dir_mode, 0o700, "config directory must have 0o700 permissions");
    }

    #[test]
    fn apply_env_overrides_changes_kernel_type() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ALCOVE_KERNEL_TYPE", "spin") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.kernel_type, "spin");
        unsafe { std::env::remove_var("ALCOVE_KERNEL_TYPE") };
    }

    #[test]
    fn apply_env_overrides_changes_console_port() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ALCOVE_CONSOLE_PORT", "9123") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.console_port, 9123);
        unsafe { std::env::remove_var("ALCOVE_CONSOLE_PORT") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_port() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ALCOVE_CONSOLE_PORT", "not-a-port") };
        let mut cfg = Config::default();
        let original = cfg.console_port;
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.console_port, original);
        unsafe { std::env::remove_var("ALCOVE_CONSOLE_PORT") };
    }
}
