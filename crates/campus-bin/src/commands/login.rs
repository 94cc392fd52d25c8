//! Interactive login and device reset.

use super::{ensure_unlocked, prompt_line, resolve_account};
use crate::output::{self, OutputFormat};
use anyhow::{anyhow, Context, Result};
use campus_auth::{AuthError, DeliveryChannel, Route, Session, VerificationChallenge};
use campus_config_and_utils::RoutePreference;
use task_orchestrator::AppContext;
use tracing::debug;

/// Log an account in, walking the user through verification if asked for.
pub async fn login(
    ctx: &AppContext,
    master_password: Option<&str>,
    account: Option<&str>,
    route: Option<RoutePreference>,
    trust: bool,
    format: &OutputFormat,
) -> Result<()> {
    ensure_unlocked(ctx, master_password)?;
    let account = match account {
        Some(selector) => resolve_account(ctx, selector)?,
        None => ctx
            .vault
            .current()
            .ok_or_else(|| anyhow!("No current account; pass one or run 'accounts use'"))?,
    };
    // Auto leaves the choice to the account's own preference.
    let route = route.and_then(|pref| match pref {
        RoutePreference::Auto => None,
        RoutePreference::Direct => Some(Route::Direct),
        RoutePreference::WebVpn => Some(Route::WebVpn),
    });

    let session = match ctx.sessions.login(&account.id, route).await {
        Ok(session) => session,
        Err(AuthError::ChallengeRequired(challenge)) => {
            complete_challenge(ctx, &challenge, trust, format).await?
        }
        Err(e) => return Err(e.into()),
    };

    match format {
        OutputFormat::Json => output::print_json(&serde_json::json!({
            "status": "success",
            "account_id": account.id,
            "username": account.username,
            "route": session.route().to_string(),
        })),
        OutputFormat::Text => output::print_success(
            &format!("Logged in as {} via {}", account.username, session.route()),
            format,
        ),
    }
    Ok(())
}

async fn complete_challenge(
    ctx: &AppContext,
    challenge: &VerificationChallenge,
    trust: bool,
    format: &OutputFormat,
) -> Result<Session> {
    let destination = match &challenge.channel {
        DeliveryChannel::Sms { masked_destination }
        | DeliveryChannel::Email { masked_destination } => masked_destination.as_str(),
        DeliveryChannel::Captcha { .. } => {
            return complete_captcha(ctx, challenge, trust, format).await
        }
        DeliveryChannel::Other => "your registered device",
    };
    ctx.authenticator.request_challenge_code(&challenge.id).await?;
    eprintln!("Verification code sent to {}", destination);

    loop {
        let code = prompt_line(&format!(
            "Code ({} digits, empty to resend): ",
            challenge.code_length
        ))?;
        if code.is_empty() {
            match ctx.authenticator.request_challenge_code(&challenge.id).await {
                Ok(()) => eprintln!("Code sent again"),
                Err(AuthError::ResendCooldown(wait)) => {
                    eprintln!("Wait {}s before requesting another code", wait.as_secs())
                }
                Err(e) => return Err(e.into()),
            }
            continue;
        }

        match ctx.sessions.answer_challenge(&challenge.id, &code, trust).await {
            Ok(session) => return Ok(session),
            Err(AuthError::InvalidCode) => output::print_error("Incorrect code", format),
            Err(e) if e.is_transient() => {
                debug!(error = %e, "Verification attempt failed");
                output::print_error(&e.to_string(), format);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Save the captcha image and read its text from the terminal.
async fn complete_captcha(
    ctx: &AppContext,
    challenge: &VerificationChallenge,
    trust: bool,
    format: &OutputFormat,
) -> Result<Session> {
    let image = challenge
        .channel
        .captcha_image()
        .ok_or_else(|| anyhow!("Identity provider sent an unreadable captcha"))?;
    let path = ctx.paths.data_dir().join("captcha.jpg");
    std::fs::write(&path, image)
        .with_context(|| format!("Failed to save captcha to {}", path.display()))?;
    eprintln!(
        "Too many failed logins; open {} and type the characters shown",
        path.display()
    );

    loop {
        let text = prompt_line("Captcha: ")?;
        if text.is_empty() {
            continue;
        }
        match ctx.sessions.answer_challenge(&challenge.id, &text, trust).await {
            Ok(session) => return Ok(session),
            Err(AuthError::InvalidCode) => output::print_error("Incorrect captcha", format),
            Err(e) if e.is_transient() => {
                debug!(error = %e, "Captcha attempt failed");
                output::print_error(&e.to_string(), format);
            }
            Err(e) => return Err(e.into()),
        }
    }
}

/// Give the account a new device identity.
pub async fn reset_device(
    ctx: &AppContext,
    account: &str,
    device_id: Option<String>,
    format: &OutputFormat,
) -> Result<()> {
    let account = resolve_account(ctx, account)?;
    let device_id = ctx
        .sessions
        .reset_device_identity(&account.id, device_id)
        .await?;
    match format {
        OutputFormat::Json => output::print_json(&serde_json::json!({
            "account_id": account.id,
            "device_id": device_id,
        })),
        OutputFormat::Text => output::print_success(
            &format!(
                "New device identity {} for {}; the next login asks for verification",
                device_id, account.username
            ),
            format,
        ),
    }
    Ok(())
}
