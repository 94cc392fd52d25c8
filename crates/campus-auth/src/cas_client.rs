//! CAS identity provider over HTTP.
//!
//! Mirrors what the login page does in a browser: fetch the form and its
//! `execution` token, encrypt the password with the provider's RSA key, ask
//! whether a second factor is needed, then post the form. After repeated
//! password failures the form also wants a captcha, which is handed out as a
//! challenge. On the WebVPN route every URL is rewritten through the gateway.

use crate::challenge::{DeliveryChannel, DEFAULT_CODE_LENGTH};
use crate::classifier::RawOutcome;
use crate::error::{AuthError, AuthResult};
use crate::provider::{
    ChallengeSpec, IdentityProvider, LoginAttempt, SessionGrant, SubmitOutcome, VerifyOutcome,
};
use crate::tunnel::WebVpnCodec;
use async_trait::async_trait;
use base64::prelude::*;
use campus_config_and_utils::IdentityProviderConfig;
use parking_lot::Mutex;
use regex::Regex;
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPublicKey};
use serde::Deserialize;
use tracing::{debug, info, warn};

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/126.0 Safari/537.36";
const PASSWORD_PREFIX: &str = "__RSA__";
/// Failed logins after which the form demands a captcha.
pub const CAPTCHA_AFTER_FAILURES: u32 = 3;
const CAPTCHA_MAX_LENGTH: usize = 8;

// Scratch keys carried in the LoginAttempt.
const LOGIN_ENTRY: &str = "cas.login_entry";
const POST_URL: &str = "cas.post_url";
const EXECUTION: &str = "cas.execution";
const ENCRYPTED_PASSWORD: &str = "cas.encrypted_password";
const MFA_STATE: &str = "cas.mfa_state";
const CAPTCHA: &str = "cas.captcha";

/// Reply of the multi-factor endpoints.
#[derive(Debug, Deserialize)]
struct MfaReply {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<MfaData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MfaData {
    #[serde(default)]
    need: bool,
    #[serde(default)]
    state: String,
    #[serde(default)]
    secure_phone: Option<String>,
    #[serde(default)]
    expired: bool,
}

pub struct CasIdentityProvider {
    config: IdentityProviderConfig,
    codec: WebVpnCodec,
    /// PEM text of the provider key, fetched once.
    public_key: Mutex<Option<String>>,
    input_tag: Regex,
    execution_name: Regex,
    value_attr: Regex,
    alert_title: Regex,
}

impl CasIdentityProvider {
    pub fn new(config: IdentityProviderConfig) -> AuthResult<Self> {
        let codec = WebVpnCodec::new(&config.webvpn_base_url)
            .map_err(|e| AuthError::Config(e.to_string()))?;
        let compile = |pattern: &str| {
            Regex::new(pattern).map_err(|e| AuthError::Config(format!("pattern {pattern}: {e}")))
        };
        Ok(Self {
            input_tag: compile(r"(?is)<input\b[^>]*>")?,
            execution_name: compile(r#"(?i)\bname\s*=\s*["']execution["']"#)?,
            value_attr: compile(r#"(?i)\bvalue\s*=\s*["']([^"']*)["']"#)?,
            alert_title: compile(r#"(?is)<el-alert\b[^>]*?\btitle\s*=\s*["']([^"']*)["']"#)?,
            config,
            codec,
            public_key: Mutex::new(None),
        })
    }

    /// The `execution` token of the login form, if the page has one.
    pub fn extract_execution(&self, html: &str) -> Option<String> {
        self.input_tag
            .find_iter(html)
            .map(|tag| tag.as_str())
            .find(|tag| self.execution_name.is_match(tag))
            .and_then(|tag| self.value_attr.captures(tag))
            .map(|caps| caps[1].to_string())
    }

    /// Title of the error banner the login page shows on failure.
    pub fn extract_alert(&self, html: &str) -> Option<String> {
        self.alert_title
            .captures(html)
            .map(|caps| caps[1].trim().to_string())
            .filter(|title| !title.is_empty())
    }

    fn client(&self, attempt: &mut LoginAttempt) -> Result<reqwest::Client, RawOutcome> {
        if let Some(client) = &attempt.client {
            return Ok(client.clone());
        }
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(USER_AGENT)
            .timeout(self.config.request_timeout())
            .build()?;
        attempt.client = Some(client.clone());
        Ok(client)
    }

    fn route_url(&self, attempt: &LoginAttempt, url: &str) -> Result<String, RawOutcome> {
        if !attempt.route.is_tunneled() {
            return Ok(url.to_string());
        }
        self.codec
            .to_vpn_url(url)
            .map_err(|e| RawOutcome::Malformed(e.to_string()))
    }

    async fn public_key(&self, client: &reqwest::Client, attempt: &LoginAttempt) -> Result<String, RawOutcome> {
        if let Some(pem) = self.public_key.lock().clone() {
            return Ok(pem);
        }
        let url = self.route_url(attempt, &self.config.public_key_url)?;
        let pem = ensure_success(client.get(&url).send().await?)?.text().await?;
        if !pem.contains("PUBLIC KEY") {
            return Err(RawOutcome::Malformed("public key endpoint returned no PEM".into()));
        }
        *self.public_key.lock() = Some(pem.clone());
        Ok(pem)
    }

    async fn post_mfa(
        &self,
        client: &reqwest::Client,
        attempt: &LoginAttempt,
        endpoint: &str,
        form: &[(&str, &str)],
    ) -> Result<(u16, MfaReply), RawOutcome> {
        let url = self.route_url(attempt, endpoint)?;
        let response = client.post(&url).form(form).send().await?;
        let status = response.status().as_u16();
        if response.status().is_server_error() {
            return Err(RawOutcome::http(status, "multi-factor endpoint failed"));
        }
        let reply = response.json::<MfaReply>().await?;
        Ok((status, reply))
    }

    /// Download a fresh captcha image. Each fetch invalidates the last one.
    async fn fetch_captcha(
        &self,
        client: &reqwest::Client,
        attempt: &LoginAttempt,
    ) -> Result<Vec<u8>, RawOutcome> {
        let url = self.route_url(attempt, &self.config.captcha_url)?;
        let image = ensure_success(client.get(&url).send().await?)?.bytes().await?;
        if image.is_empty() {
            return Err(RawOutcome::Malformed("captcha endpoint returned no image".into()));
        }
        Ok(image.to_vec())
    }

    /// Post the filled login form. Used for the first submission and to
    /// finish a login after a verified code.
    async fn post_login_form(
        &self,
        client: &reqwest::Client,
        attempt: &mut LoginAttempt,
        mfa_state: &str,
        trust_agent: &str,
        captcha: &str,
    ) -> Result<SessionGrant, RawOutcome> {
        let post_url = attempt
            .scratch(POST_URL)
            .ok_or_else(|| RawOutcome::Malformed("login form was not loaded".into()))?;
        let post_url = self.route_url(attempt, post_url)?;
        let fail_n = attempt.failed_logins.to_string();
        let form = [
            ("username", attempt.username.as_str()),
            ("password", attempt.scratch(ENCRYPTED_PASSWORD).unwrap_or_default()),
            ("execution", attempt.scratch(EXECUTION).unwrap_or_default()),
            ("_eventId", "submit"),
            ("submit1", "Login1"),
            ("fpVisitorId", attempt.device_id.as_str()),
            ("captcha", captcha),
            ("currentMenu", "1"),
            ("failN", fail_n.as_str()),
            ("mfaState", mfa_state),
            ("geolocation", ""),
            ("trustAgent", trust_agent),
        ];

        let response = client.post(&post_url).form(&form).send().await?;
        let status = response.status();
        if status.as_u16() == 401 {
            return Err(RawOutcome::http(401, "username or password incorrect"));
        }
        let body = ensure_success(response)?.text().await?;
        if let Some(alert) = self.extract_alert(&body) {
            // The page answers 200 and explains the failure in a banner. The
            // re-rendered form carries the token for another try.
            if let Some(execution) = self.extract_execution(&body) {
                attempt.set_scratch(EXECUTION, execution);
            }
            return Err(RawOutcome::http(401, alert));
        }
        if self.extract_execution(&body).is_some() {
            return Err(RawOutcome::Malformed("login form returned without a result".into()));
        }

        Ok(SessionGrant {
            client: Some(client.clone()),
            ..SessionGrant::default()
        })
    }
}

fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, RawOutcome> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(RawOutcome::http(
            status.as_u16(),
            status.canonical_reason().unwrap_or("unexpected status"),
        ))
    }
}

pub fn needs_captcha(failed_logins: u32) -> bool {
    failed_logins >= CAPTCHA_AFTER_FAILURES
}

/// Whether a login banner complains about the captcha rather than the
/// password.
fn is_captcha_rejection(alert: &str) -> bool {
    alert.contains("验证码") || alert.to_ascii_lowercase().contains("captcha")
}

/// RSA PKCS#1 v1.5 encrypt, base64 encode and prefix the password.
pub fn encrypt_password(pem: &str, password: &str) -> Result<String, RawOutcome> {
    let pem = pem.trim();
    let key = RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| RawOutcome::Malformed(format!("public key: {e}")))?;
    let ciphertext = key
        .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, password.as_bytes())
        .map_err(|e| RawOutcome::Malformed(format!("password encryption: {e}")))?;
    Ok(format!("{PASSWORD_PREFIX}{}", BASE64_STANDARD.encode(ciphertext)))
}

#[async_trait]
impl IdentityProvider for CasIdentityProvider {
    async fn negotiate_tunnel(&self, attempt: &mut LoginAttempt) -> Result<(), RawOutcome> {
        let client = self.client(attempt)?;
        let response = client.get(&self.config.webvpn_login_url).send().await?;
        let response = ensure_success(response)?;
        let entry = response.url().to_string();
        if !self.codec.is_gateway_url(&entry) {
            return Err(RawOutcome::Malformed(format!(
                "gateway redirected off-gateway to {entry}"
            )));
        }
        debug!(account_id = %attempt.account_id, "WebVPN gateway session opened");
        attempt.set_scratch(LOGIN_ENTRY, entry);
        Ok(())
    }

    async fn submit_credentials(
        &self,
        attempt: &mut LoginAttempt,
    ) -> Result<SubmitOutcome, RawOutcome> {
        let client = self.client(attempt)?;
        let entry = match attempt.scratch(LOGIN_ENTRY) {
            Some(entry) => entry.to_string(),
            None => self.route_url(attempt, &self.config.login_url)?,
        };

        let response = ensure_success(client.get(&entry).send().await?)?;
        let post_url = response.url().to_string();
        let page = response.text().await?;
        let execution = self
            .extract_execution(&page)
            .ok_or_else(|| RawOutcome::Malformed("login form has no execution token".into()))?;
        attempt.set_scratch(POST_URL, post_url);
        attempt.set_scratch(EXECUTION, execution);

        let pem = self.public_key(&client, attempt).await?;
        let encrypted = encrypt_password(&pem, &attempt.secret)?;
        attempt.set_scratch(ENCRYPTED_PASSWORD, encrypted.as_str());

        let (status, reply) = self
            .post_mfa(
                &client,
                attempt,
                &self.config.mfa_detect_url,
                &[
                    ("username", attempt.username.as_str()),
                    ("password", encrypted.as_str()),
                    ("fpVisitorId", attempt.device_id.as_str()),
                ],
            )
            .await?;
        if reply.code != 0 {
            if status == 401 || status == 403 {
                return Err(RawOutcome::http(status, reply.message));
            }
            // Kept so a verification demanded by business code can be answered.
            if let Some(data) = &reply.data {
                attempt.set_scratch(MFA_STATE, data.state.as_str());
            }
            return Err(RawOutcome::Business {
                code: reply.code,
                detail: reply.message,
            });
        }
        let data = reply.data.unwrap_or_default();
        attempt.set_scratch(MFA_STATE, data.state.as_str());

        if data.need {
            info!(account_id = %attempt.account_id, "Identity provider requires a verification code");
            return Ok(SubmitOutcome::ChallengeRequired(ChallengeSpec {
                channel: DeliveryChannel::Sms {
                    masked_destination: data.secure_phone.unwrap_or_default(),
                },
                code_length: DEFAULT_CODE_LENGTH,
            }));
        }

        if needs_captcha(attempt.failed_logins) {
            let image = self.fetch_captcha(&client, attempt).await?;
            attempt.set_scratch(CAPTCHA, "pending");
            info!(
                account_id = %attempt.account_id,
                failed_logins = attempt.failed_logins,
                "Identity provider requires a captcha"
            );
            return Ok(SubmitOutcome::ChallengeRequired(ChallengeSpec {
                channel: DeliveryChannel::captcha(&image),
                code_length: CAPTCHA_MAX_LENGTH,
            }));
        }

        let grant = self
            .post_login_form(&client, attempt, &data.state, "", "")
            .await?;
        Ok(SubmitOutcome::Authenticated(grant))
    }

    async fn send_challenge_code(&self, attempt: &LoginAttempt) -> Result<(), RawOutcome> {
        if attempt.scratch(CAPTCHA).is_some() {
            // The image went out with the challenge.
            return Ok(());
        }
        let client = attempt
            .client
            .clone()
            .ok_or_else(|| RawOutcome::Malformed("no login in progress".into()))?;
        let state = attempt.scratch(MFA_STATE).unwrap_or_default();
        let (_, reply) = self
            .post_mfa(&client, attempt, &self.config.mfa_send_code_url, &[("state", state)])
            .await?;
        if reply.code != 0 {
            warn!(business_code = reply.code, "Verification code delivery refused");
            return Err(RawOutcome::Business {
                code: reply.code,
                detail: reply.message,
            });
        }
        Ok(())
    }

    async fn verify_challenge(
        &self,
        attempt: &mut LoginAttempt,
        code: &str,
        trust_client: bool,
    ) -> Result<VerifyOutcome, RawOutcome> {
        let client = self.client(attempt)?;
        let state = attempt.scratch(MFA_STATE).unwrap_or_default().to_string();
        if attempt.scratch(CAPTCHA).is_some() {
            return match self.post_login_form(&client, attempt, &state, "", code).await {
                Ok(grant) => Ok(VerifyOutcome::Authenticated(grant)),
                Err(RawOutcome::Http { status: 401, detail }) if is_captcha_rejection(&detail) => {
                    debug!(account_id = %attempt.account_id, "Captcha not accepted");
                    Ok(VerifyOutcome::InvalidCode)
                }
                Err(other) => Err(other),
            };
        }
        let trust = if trust_client { "true" } else { "false" };
        let (status, reply) = self
            .post_mfa(
                &client,
                attempt,
                &self.config.mfa_verify_url,
                &[
                    ("state", state.as_str()),
                    ("code", code),
                    ("fpVisitorId", attempt.device_id.as_str()),
                    ("trustAgent", trust),
                ],
            )
            .await?;

        if reply.code != 0 {
            let expired = status == 410 || reply.data.as_ref().is_some_and(|d| d.expired);
            debug!(business_code = reply.code, expired, "Verification code not accepted");
            return Ok(if expired {
                VerifyOutcome::Expired
            } else {
                VerifyOutcome::InvalidCode
            });
        }

        let grant = self
            .post_login_form(&client, attempt, &state, trust, "")
            .await?;
        Ok(VerifyOutcome::Authenticated(grant))
    }
}
