//! CLI command implementations

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use chrono::{Duration, Utc};

use crate::api::RelayRequest;
use crate::auth::tokens::{FlowType, TokenState};
use crate::auth::{Token, TokenLifecycle};
use crate::config::{mask, Configuration, ConfigurationUpdate};

/// Tokens this close to expiry are flagged in `status`.
const EXPIRY_WARNING_MINUTES: i64 = 5;

fn or_none(value: &str) -> &str {
    if value.is_empty() {
        "(none)"
    } else {
        value
    }
}

fn print_config(config: &Configuration) {
    println!("Client ID:     {}", or_none(&config.client_id));
    println!("Client secret: {}", or_none(&mask(&config.client_secret)));
    println!("Tenant ID:     {}", or_none(&config.tenant_id));
    println!("Authority:     {}", config.authority());
    println!("Redirect URI:  {}", or_none(&config.redirect_uri));
    println!("Scopes:");
    for scope in &config.scopes {
        println!("  {}", scope);
    }
}

fn print_token(token: &Token) {
    let now = Utc::now();
    let state = match token.state(now) {
        TokenState::Active => "active",
        TokenState::Expired => "expired",
        TokenState::Revoked => "revoked",
        TokenState::Refreshed => "refreshed",
    };
    println!("Token {}:     {}", token.id, state);
    println!("  access:     {}", mask(&token.access_token));
    println!("  expires_at: {}", token.expires_at);
    if token.state(now) == TokenState::Active {
        println!("  expires_in: {}s", token.expires_in(now));
    }
    println!("  flow:       {}", flow_name(token));
    println!("  scopes:     {}", token.scopes.join(" "));
    if let Some(user) = &token.user_id {
        println!("  account:    {}", user);
    }
    if let Some(used) = token.last_used {
        println!("  last_used:  {}", used);
    }
    match &token.refresh_token {
        Some(rt) => println!("Refresh tok:  present ({})", mask(rt)),
        None => println!("Refresh tok:  none"),
    }
}

fn flow_name(token: &Token) -> &'static str {
    match token.flow_type {
        FlowType::AuthorizationCode => "authorization_code",
        FlowType::RefreshToken => "refresh_token",
    }
}

/// Merge the given fields into the stored configuration.
pub async fn configure(lifecycle: &TokenLifecycle, update: ConfigurationUpdate) -> Result<()> {
    let current = lifecycle.configuration().await?;
    let saved = lifecycle.save_configuration(current.merged(update)).await?;
    println!("Configuration saved.");
    println!();
    print_config(&saved);

    let missing = saved.missing_credentials();
    if !missing.is_empty() {
        println!();
        println!("Still missing: {}", missing.join(", "));
    }
    Ok(())
}

pub async fn show_config(lifecycle: &TokenLifecycle) -> Result<()> {
    let config = lifecycle.configuration().await?;
    print_config(&config);
    println!("Callback:      {}", lifecycle.redirect_uri(&config));
    Ok(())
}

/// Print the sign-in URL. The code comes back to the redirect URI.
pub async fn login(lifecycle: &TokenLifecycle) -> Result<()> {
    let redirect = lifecycle.begin_authorization().await?;
    let config = lifecycle.configuration().await?;

    println!();
    println!("To sign in, visit:");
    println!("  {}", redirect.url);
    println!();
    println!("Requested scopes: {}", redirect.scopes.join(" "));
    println!(
        "After consent the browser is sent to {}.",
        lifecycle.redirect_uri(&config)
    );
    println!("Pass the `code` query parameter to `graph-playground callback --code <code>`,");
    println!("or run `graph-playground serve` to handle the callback automatically.");
    Ok(())
}

pub async fn callback(
    lifecycle: &TokenLifecycle,
    code: &str,
    state: Option<&str>,
    show_response: bool,
) -> Result<()> {
    lifecycle.check_state(state).await?;
    let authorized = lifecycle.complete_authorization(Some(code)).await?;

    println!("Login successful.");
    if let Some(account) = &authorized.account {
        if let Some(name) = account.preferred_username.as_deref().or(account.name.as_deref()) {
            println!("Signed in as {}", name);
        }
    }
    println!();
    print_token(&authorized.token);

    if show_response {
        let raw = serde_json::to_string_pretty(&authorized.raw)
            .context("Failed to format token response")?;
        println!();
        println!("Token response:");
        println!("{}", raw);
    }
    Ok(())
}

pub async fn status(lifecycle: &TokenLifecycle) -> Result<()> {
    let config = lifecycle.configuration().await?;
    let missing = config.missing_credentials();
    if missing.is_empty() {
        println!("Configuration: complete");
    } else {
        println!("Configuration: missing {}", missing.join(", "));
    }

    let Some(token) = lifecycle.current_token().await? else {
        println!("Token:        none");
        return Ok(());
    };
    print_token(&token);

    let now = Utc::now();
    if token.state(now) == TokenState::Active
        && token.expires_within(now, Duration::minutes(EXPIRY_WARNING_MINUTES))
    {
        println!();
        println!(
            "Warning: token expires within {} minutes; run `graph-playground refresh`.",
            EXPIRY_WARNING_MINUTES
        );
    }

    let retired = lifecycle.retired_tokens().await?;
    if !retired.is_empty() {
        println!();
        println!("Previous tokens:");
        for old in retired {
            println!(
                "  {}  {:?}  created {}",
                mask(&old.access_token),
                old.status,
                old.created_at
            );
        }
    }
    Ok(())
}

pub async fn refresh(lifecycle: &TokenLifecycle, id: &str) -> Result<()> {
    let refreshed = lifecycle.refresh_token(id).await?;
    println!("Token refreshed successfully.");
    println!("  expires_at: {}", refreshed.token.expires_at);
    Ok(())
}

pub async fn revoke(lifecycle: &TokenLifecycle, id: &str) -> Result<()> {
    let revocation = lifecycle.revoke_token(id).await?;
    if revocation.changed {
        println!("Token {} revoked.", revocation.token.id);
    } else {
        println!("Token {} was already revoked.", revocation.token.id);
    }
    Ok(())
}

pub async fn test(lifecycle: &TokenLifecycle, id: &str) -> Result<()> {
    let test = lifecycle.test_token(id).await?;
    let verdict = if test.valid { "valid" } else { "invalid" };
    match test.status_code {
        Some(status) => println!("Token is {} (HTTP {}, {} ms)", verdict, status, test.response_time_ms),
        None => println!("Token is {}", verdict),
    }
    if let Some(note) = test.note {
        println!("  note:  {}", note);
    }
    if let Some(error) = test.error {
        println!("  error: {}", error);
    }
    Ok(())
}

pub async fn usage(lifecycle: &TokenLifecycle, limit: usize) -> Result<()> {
    let records = lifecycle.usage_history(limit).await?;
    if records.is_empty() {
        println!("No usage recorded.");
        return Ok(());
    }
    for record in records {
        println!(
            "#{:<4} {}  token {}  {} {}  {}  {} ms{}",
            record.id,
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            record.token_id,
            record.method,
            record.endpoint,
            record.status_code,
            record.response_time_ms,
            record
                .error_message
                .map(|e| format!("  ({})", e))
                .unwrap_or_default()
        );
    }
    Ok(())
}

pub async fn stats(lifecycle: &TokenLifecycle) -> Result<()> {
    let stats = lifecycle.statistics().await?;
    println!("Total:   {}", stats.total_tokens);
    println!("Active:  {}", stats.active_tokens);
    println!("Expired: {}", stats.expired_tokens);
    println!("Revoked: {}", stats.revoked_tokens);
    Ok(())
}

/// Split `key=value` or `Name: value` pairs.
pub fn parse_pairs(pairs: &[String], separator: char) -> Result<BTreeMap<String, String>> {
    pairs
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once(separator)
                .with_context(|| format!("Expected `key{}value`, got `{}`", separator, pair))?;
            Ok((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Send an arbitrary request, using the stored token unless one is given.
pub async fn request(lifecycle: &TokenLifecycle, mut request: RelayRequest) -> Result<()> {
    if request.token.is_none() {
        let token = lifecycle
            .active_token()
            .await?
            .context("No active token. Run `graph-playground login` first or pass --token.")?;
        request.token = Some(token.access_token);
    }

    let response = lifecycle.graph().relay(request).await?;
    println!(
        "HTTP {} {} ({} ms)",
        response.status, response.status_text, response.response_time
    );
    let body = serde_json::to_string_pretty(&response.data).context("Failed to format response")?;
    println!("{}", body);

    if response.error {
        bail!("Request failed with HTTP {}", response.status);
    }
    Ok(())
}
