//! User profile endpoint (/me)

use anyhow::{bail, Context, Result};

use crate::auth::TokenLifecycle;
use crate::models::User;

/// Test the stored token against `/me` and display the profile.
pub async fn whoami(lifecycle: &TokenLifecycle) -> Result<()> {
    let token = lifecycle
        .current_token()
        .await?
        .context("No token stored. Run `graph-playground login` first.")?;
    let test = lifecycle.test_token(&token.id.to_string()).await?;

    let profile = match (test.valid, test.profile) {
        (true, Some(profile)) => profile,
        (true, None) => {
            println!(
                "Token is {}.",
                test.note.as_deref().unwrap_or("valid but returned no profile")
            );
            return Ok(());
        }
        (false, _) => bail!(
            "Token is not valid: {}",
            test.error.or(test.note).unwrap_or_else(|| "unknown reason".to_string())
        ),
    };
    let me: User = serde_json::from_value(profile).context("Failed to parse /me response")?;

    println!();
    println!(
        "Display Name: {}",
        me.display_name.as_deref().unwrap_or("(none)")
    );
    println!("Mail:         {}", me.mail.as_deref().unwrap_or("(none)"));
    println!(
        "UPN:          {}",
        me.user_principal_name.as_deref().unwrap_or("(none)")
    );
    if let Some(title) = me.job_title.as_deref() {
        println!("Job Title:    {}", title);
    }
    if let Some(office) = me.office_location.as_deref() {
        println!("Office:       {}", office);
    }
    println!("ID:           {}", me.id);
    println!("Latency:      {} ms", test.response_time_ms);

    Ok(())
}
