//! Configuration from .fwpackrc (JSON) in the working dir or ~/.fwpackrc, overridden by env.
//! Resolved once at process start and passed by reference; core logic never reads the environment.

use std::path::{Path, PathBuf};

pub const DEFAULT_SERVER_URL: &str = "http://0.0.0.0";
pub const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;
pub const DEFAULT_PACKAGE_FILE: &str = ".fwpack";
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_RETRIES: usize = 2;

const RC_FILE: &str = ".fwpackrc";

/// Settings consumed by the package and transport constructors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Base URL of the update server, without trailing slash.
    pub server_url: String,
    /// Size of each uploaded part in bytes.
    pub chunk_size: usize,
    /// Manifest file path.
    pub package_file: PathBuf,
    pub timeout_ms: u64,
    pub retries: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            package_file: PathBuf::from(DEFAULT_PACKAGE_FILE),
            timeout_ms: DEFAULT_TIMEOUT_MS,
            retries: DEFAULT_RETRIES,
        }
    }
}

impl Config {
    /// Defaults, then the first rc file found (dir, then home), then env overrides.
    /// Missing or invalid rc file = defaults. `env` looks up a variable by name.
    pub fn resolve<F>(dir: &Path, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Config::default();
        let candidates = [Some(dir.join(RC_FILE)), dirs::home_dir().map(|h| h.join(RC_FILE))];
        for path in candidates.iter().flatten() {
            if path.is_file() {
                cfg.apply_rc_file(path);
                break;
            }
        }
        cfg.apply_env(env);
        cfg
    }

    /// Convenience for the binary: resolve against the process environment.
    pub fn from_process_env(dir: &Path) -> Self {
        Self::resolve(dir, |key| std::env::var(key).ok())
    }

    fn apply_rc_file(&mut self, path: &Path) {
        let Ok(s) = std::fs::read_to_string(path) else {
            return;
        };
        let Ok(v) = serde_json::from_str::<serde_json::Value>(&s) else {
            tracing::warn!("ignoring unparseable config file {}", path.display());
            return;
        };
        if let Some(url) = v.get("serverUrl").and_then(|x| x.as_str()) {
            self.server_url = url.trim_end_matches('/').to_string();
        }
        if let Some(n) = v.get("chunkSize").and_then(|x| x.as_u64()) {
            if n > 0 {
                self.chunk_size = n as usize;
            }
        }
        if let Some(f) = v.get("packageFile").and_then(|x| x.as_str()) {
            self.package_file = PathBuf::from(f);
        }
        if let Some(t) = v.get("timeoutMs").and_then(|x| x.as_u64()) {
            self.timeout_ms = t;
        }
        if let Some(r) = v.get("retries").and_then(|x| x.as_u64()) {
            self.retries = r as usize;
        }
    }

    fn apply_env<F>(&mut self, env: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env("FWPACK_SERVER_URL") {
            if !v.trim().is_empty() {
                self.server_url = v.trim().trim_end_matches('/').to_string();
            }
        }
        if let Some(n) = env("FWPACK_CHUNK_SIZE").and_then(|v| v.trim().parse::<usize>().ok()) {
            if n > 0 {
                self.chunk_size = n;
            }
        }
        if let Some(v) = env("FWPACK_PACKAGE_FILE") {
            if !v.trim().is_empty() {
                self.package_file = PathBuf::from(v.trim());
            }
        }
    }

    /// Full URL for a server path ("/products/..." style).
    pub fn server_url(&self, path: &str) -> String {
        format!("{}{}", self.server_url, path)
    }

    /// Directory holding the manifest; pulled artifacts land here.
    pub fn package_dir(&self) -> PathBuf {
        match self.package_file.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}
