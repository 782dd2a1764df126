use std::path::Path;

use anyhow::Result;
use chrono::{Duration, Utc};
use clap::Parser;

use crate::{
    service::SESSION_FILE,
    sync::session::{Session, SessionStore},
};

#[derive(Debug, Parser)]
pub struct LoginCommand {
    #[arg(long, help = "Id of the account the activity belongs to")]
    user: String,
    #[arg(long, env = "TABTRAIL_TOKEN", hide_env_values = true, help = "Bearer token for the store")]
    token: String,
    #[arg(long, help = "Hours until the token expires. Never expires when omitted")]
    expires_in: Option<u32>,
}

pub async fn process_login_command(
    LoginCommand {
        user,
        token,
        expires_in,
    }: LoginCommand,
    dir: &Path,
) -> Result<()> {
    let store = SessionStore::load(dir.join(SESSION_FILE)).await?;
    store
        .set(Session {
            user_id: user.clone(),
            access_token: token,
            expires_at: expires_in.map(|v| Utc::now() + Duration::hours(v.into())),
        })
        .await?;
    println!("Signed in as {user}");
    Ok(())
}

pub async fn process_logout_command(dir: &Path) -> Result<()> {
    SessionStore::load(dir.join(SESSION_FILE)).await?.clear().await?;
    println!("Signed out");
    Ok(())
}

pub async fn process_session_command(dir: &Path) -> Result<()> {
    let store = SessionStore::load(dir.join(SESSION_FILE)).await?;
    match store.current() {
        None => println!("Not signed in"),
        Some(session) => {
            let state = if session.is_valid_at(Utc::now()) {
                "valid"
            } else {
                "expired"
            };
            let expiry = session
                .expires_at
                .map(|v| v.to_rfc3339())
                .unwrap_or_else(|| "never".into());
            println!("{}\t{state}\texpires {expiry}", session.user_id);
        }
    }
    Ok(())
}
