//! Bootstrap helpers for contract-studio.
//!
//! Env vars needed before settings load (API keys, store selection) can live
//! in `~/.contract-studio/.env` (standard dotenvy format).

use std::path::{Path, PathBuf};

/// Directory holding settings, config overlay, env file and the default store.
pub fn studio_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".contract-studio")
}

/// Path to the studio-specific `.env` file: `~/.contract-studio/.env`.
pub fn studio_env_path() -> PathBuf {
    studio_home().join(".env")
}

/// Load `./.env` and then `~/.contract-studio/.env`.
///
/// dotenvy never overwrites existing env vars, so the effective priority is:
///
///   explicit env vars > `./.env` > `~/.contract-studio/.env`
pub fn load_studio_env() {
    let _ = dotenvy::dotenv();
    load_env_file(&studio_env_path());
}

fn load_env_file(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = dotenvy::from_path(path) {
        eprintln!("Warning: failed to load {}: {}", path.display(), e);
    }
}

/// Default record store location for a backend.
pub fn default_store_path(libsql: bool) -> PathBuf {
    if libsql {
        studio_home().join("store.db")
    } else {
        studio_home().join("store.json")
    }
}
