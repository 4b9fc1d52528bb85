use anyhow::{Context, Result, bail};
use microtask_api::{HttpTaskSource, LoginSession};
use microtask_core::StatStore;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::Config;
use crate::state::{FileStore, ensure_home};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub token: Option<String>,
    pub refresh_token: Option<String>,
    pub user_info: Option<serde_json::Value>,
}

impl From<LoginSession> for AuthState {
    fn from(s: LoginSession) -> Self {
        Self {
            token: Some(s.token),
            refresh_token: s.refresh_token,
            user_info: s.user_info,
        }
    }
}

fn auth_path() -> Result<PathBuf> {
    Ok(ensure_home()?.join("auth.json"))
}

pub fn load_auth() -> Result<AuthState> {
    load_auth_from(&auth_path()?)
}

fn load_auth_from(p: &Path) -> Result<AuthState> {
    if !p.exists() {
        return Ok(AuthState::default());
    }
    let s = fs::read_to_string(p).with_context(|| format!("read {}", p.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parse {}", p.display()))
}

fn save_auth_to(auth: &AuthState, p: &Path) -> Result<()> {
    let s = serde_json::to_string_pretty(auth)?;
    fs::write(p, s).with_context(|| format!("write {}", p.display()))?;
    Ok(())
}

/// HTTP source carrying the saved token.
pub fn authed_source(cfg: &Config) -> Result<HttpTaskSource> {
    let auth = load_auth()?;
    let Some(token) = auth.token else {
        bail!("not logged in (run `microtask login <phone>` first)");
    };
    Ok(HttpTaskSource::new(&cfg.api.base_url, cfg.request_timeout())?.with_token(token))
}

fn prompt_secret(label: &str) -> Result<String> {
    print!("{}: ", label);
    io::stdout().flush().ok();
    let mut s = String::new();
    io::stdin().read_line(&mut s)?;
    Ok(s.trim().to_string())
}

pub async fn login(cfg: &Config, phone: &str) -> Result<()> {
    let password = prompt_secret("Password")?;
    if password.is_empty() {
        bail!("password must not be empty");
    }

    let source = HttpTaskSource::new(&cfg.api.base_url, cfg.request_timeout())?;
    let session = source.login(phone, &password).await.context("login failed")?;
    let p = auth_path()?;
    save_auth_to(&AuthState::from(session), &p)?;

    // a fresh user starts from the default records
    let mut store = StatStore::new(FileStore::open_default()?);
    store.ensure_initialized()?;

    info!(phone, "logged in");
    println!("Logged in. Token saved to {}", p.display());
    Ok(())
}

pub fn logout() -> Result<()> {
    let p = auth_path()?;
    if p.exists() {
        fs::remove_file(&p).with_context(|| format!("remove {}", p.display()))?;
        println!("Logged out.");
    } else {
        println!("Not logged in.");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_file_roundtrip_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("auth.json");
        assert_eq!(load_auth_from(&p).unwrap(), AuthState::default());

        let state = AuthState::from(LoginSession {
            token: "abc".to_string(),
            refresh_token: Some("def".to_string()),
            user_info: None,
        });
        save_auth_to(&state, &p).unwrap();

        let raw = fs::read_to_string(&p).unwrap();
        assert!(raw.contains("\"refreshToken\""));
        assert_eq!(load_auth_from(&p).unwrap().token.as_deref(), Some("abc"));
    }
}
