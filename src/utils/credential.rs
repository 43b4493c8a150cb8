//! Upload API key lookup: CLI flag → environment → `.env` in a directory.

use log::{debug, info};
use std::path::Path;

use crate::Credential;
use crate::utils::config::PackagePaths;

fn non_empty(s: String) -> Option<String> {
    let s = s.trim().to_string();
    (!s.is_empty()).then_some(s)
}

fn try_env_then_dotenv(dir: &Path) -> Option<String> {
    let key = PackagePaths::get().api_key_env();
    if let Some(s) = std::env::var(key).ok().and_then(non_empty) {
        return Some(s);
    }
    let env_path = dir.join(".env");
    if env_path.is_file() {
        let _ = dotenvy::from_path(&env_path);
        return std::env::var(key).ok().and_then(non_empty);
    }
    None
}

/// Resolve the credential for the authenticated protocol. `flag` wins when given.
/// Returns None when no key is configured anywhere (legacy protocol).
pub fn resolve_credential(flag: Option<&str>, dir: &Path) -> Option<Credential> {
    if let Some(s) = flag.map(str::to_string).and_then(non_empty) {
        debug!("API key taken from command line");
        return Some(Credential::new(s));
    }
    let found = try_env_then_dotenv(dir).map(Credential::new);
    if found.is_some() {
        info!(
            "API key found in environment ({}); using authenticated uploads",
            PackagePaths::get().api_key_env()
        );
    }
    found
}
