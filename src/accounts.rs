// Copyright (c) 2025-2026 Kodelet Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! `kodelet accounts` — subscription-account management over the
//! credential store.

use std::io::Write;
use std::process::ExitCode;

use clap::Subcommand;

use kodelet_auth::{
    build_auth_url, compute_code_challenge, exchange_code, generate_code_verifier,
    generate_state, AuthCodeRequest, CredentialRecord, CredentialStore,
};
use kodelet_model::probe_rate_limits;

#[derive(Subcommand)]
pub enum AccountsCommand {
    /// List accounts; the default is marked with '*'.
    List,
    /// Log in a new account via the browser OAuth flow.
    Add {
        /// Explicit alias (defaults to one derived from the email).
        #[arg(long)]
        alias: Option<String>,
    },
    /// Remove an account.
    Remove { alias: String },
    /// Rename an account.
    Rename { old: String, new: String },
    /// Set the default account.
    Default { alias: String },
    /// Show rate-limit windows for an account.
    Usage {
        /// Alias; omitted means the default account.
        alias: Option<String>,
    },
}

pub async fn run(
    config: kodelet_config::Config,
    command: AccountsCommand,
) -> anyhow::Result<ExitCode> {
    let store = CredentialStore::open_default();
    match command {
        AccountsCommand::List => {
            for (alias, record, is_default) in store.list()? {
                let marker = if is_default { "*" } else { " " };
                println!("{marker} {alias:<20} {}", record.email);
            }
        }
        AccountsCommand::Add { alias } => {
            let added = login(&store, alias).await?;
            println!("added account {added:?}");
        }
        AccountsCommand::Remove { alias } => {
            store.remove(&alias).await?;
            println!("removed {alias}");
        }
        AccountsCommand::Rename { old, new } => {
            store.rename(&old, &new).await?;
            println!("renamed {old} -> {new}");
        }
        AccountsCommand::Default { alias } => {
            store.set_default(&alias).await?;
            println!("default is now {alias}");
        }
        AccountsCommand::Usage { alias } => {
            let info = probe_rate_limits(
                &store,
                alias.as_deref(),
                config.model.base_url.as_deref(),
                &config.model.name,
            )
            .await?;
            print_window("5-hour", &info.five_hour);
            print_window("7-day ", &info.seven_day);
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn print_window(label: &str, window: &kodelet_model::RateLimitWindow) {
    let utilization = window
        .utilization
        .map(|u| format!("{:.0}%", u * 100.0))
        .unwrap_or_else(|| "?".into());
    let reset = window
        .resets_at
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "unknown".into());
    println!("{label}  {:?}  used {utilization}  resets {reset}", window.status);
}

/// Authorization-code + PKCE login: print the URL, read the pasted code,
/// exchange, store.
async fn login(store: &CredentialStore, alias: Option<String>) -> anyhow::Result<String> {
    let verifier = generate_code_verifier();
    let challenge = compute_code_challenge(&verifier);
    let state = generate_state();
    let url = build_auth_url(
        kodelet_auth::SUBSCRIPTION_AUTH_URL,
        kodelet_auth::SUBSCRIPTION_CLIENT_ID,
        kodelet_auth::SUBSCRIPTION_REDIRECT_URI,
        kodelet_auth::SUBSCRIPTION_SCOPE,
        &challenge,
        &state,
    );

    println!("Open this URL in your browser and authorize kodelet:\n\n  {url}\n");
    print!("Paste the authorization code here: ");
    std::io::stdout().flush()?;
    let mut code = String::new();
    std::io::stdin().read_line(&mut code)?;
    let code = code.trim();
    if code.is_empty() {
        anyhow::bail!("no authorization code provided");
    }

    let client = reqwest::Client::new();
    let token = exchange_code(
        &client,
        kodelet_auth::SUBSCRIPTION_TOKEN_URL,
        AuthCodeRequest {
            code,
            code_verifier: &verifier,
            state: &state,
        },
    )
    .await?;

    let account = token.account.as_ref();
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs();
    let record = CredentialRecord {
        email: account
            .map(|a| a.email_address.clone())
            .unwrap_or_default(),
        access_token: token.access_token.clone(),
        refresh_token: token.refresh_token.clone().unwrap_or_default(),
        expires_at: now + token.expires_in,
        scope: token.scope.clone().unwrap_or_default(),
        account_uuid: account.map(|a| a.uuid.clone()),
        organization_uuid: token.organization.as_ref().map(|o| o.uuid.clone()),
    };
    Ok(store.add(alias, record).await?)
}
