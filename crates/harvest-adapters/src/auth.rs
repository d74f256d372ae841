//! Session authenticator: drives the login form and waits for the greeting marker.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use harvest_core::Credential;
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

use crate::browser::{Browser, Condition, WaitError};
use crate::session::{pause, HarvestError, Session};

/// Point-in-time capture of the page when login did not succeed.
#[derive(Debug, Clone)]
pub struct DiagnosticSnapshot {
    pub captured_at: DateTime<Utc>,
    pub reason: String,
    pub screenshot: Option<Vec<u8>>,
    pub page_source: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AuthResult {
    pub success: bool,
    pub reason: Option<String>,
    pub diagnostics: Option<DiagnosticSnapshot>,
}

impl AuthResult {
    pub fn into_result(self) -> Result<(), HarvestError> {
        if self.success {
            Ok(())
        } else {
            Err(HarvestError::AuthenticationFailed {
                reason: self.reason.unwrap_or_else(|| "unknown".to_string()),
            })
        }
    }
}

#[derive(Debug, Error)]
#[error("login step `{step}` failed: {source}")]
struct LoginStepError {
    step: &'static str,
    #[source]
    source: WaitError,
}

fn at(step: &'static str) -> impl Fn(WaitError) -> LoginStepError {
    move |source| LoginStepError { step, source }
}

impl<B: Browser> Session<B> {
    /// Log in with `credential`. No retries: one failed pass yields a failed result.
    pub async fn authenticate(&mut self, credential: &Credential) -> Result<AuthResult, HarvestError> {
        if !credential.is_complete() {
            return Err(HarvestError::MissingCredential);
        }
        self.authenticated = false;

        let span = info_span!("authenticate", username = %credential.username);
        let outcome = self.login_steps(credential).instrument(span).await;
        match outcome {
            Ok(()) => {
                self.authenticated = true;
                info!("successfully logged in");
                Ok(AuthResult {
                    success: true,
                    reason: None,
                    diagnostics: None,
                })
            }
            Err(err) => {
                let reason = err.to_string();
                warn!(%reason, "login failed");
                let diagnostics = self.capture_diagnostics(&reason).await;
                Ok(AuthResult {
                    success: false,
                    reason: Some(reason),
                    diagnostics: Some(diagnostics),
                })
            }
        }
    }

    async fn login_steps(&mut self, credential: &Credential) -> Result<(), LoginStepError> {
        let layout = Arc::clone(&self.layout);
        let login = &layout.login;
        let gate = self.timeouts.auth_gate();
        let settle = self.timeouts.settle_delay;

        self.browser
            .goto(&layout.base_url)
            .await
            .map_err(|e| at("open site")(e.into()))?;

        let open = gate
            .until(&mut self.browser, None, Condition::Clickable(&login.open_login))
            .await
            .map_err(at("open login"))?;
        pause(settle).await;
        self.browser
            .click(&open)
            .await
            .map_err(|e| at("open login")(e.into()))?;

        for (step, locator, value) in [
            ("enter username", &login.username_field, credential.username.as_str()),
            ("enter password", &login.password_field, credential.password.as_str()),
        ] {
            let field = gate
                .until(&mut self.browser, None, Condition::Clickable(locator))
                .await
                .map_err(at(step))?;
            pause(settle).await;
            self.browser
                .clear(&field)
                .await
                .map_err(|e| at(step)(e.into()))?;
            self.browser
                .send_keys(&field, value)
                .await
                .map_err(|e| at(step)(e.into()))?;
        }

        let submit = gate
            .until(&mut self.browser, None, Condition::Clickable(&login.submit))
            .await
            .map_err(at("submit"))?;
        pause(settle).await;
        self.browser
            .click(&submit)
            .await
            .map_err(|e| at("submit")(e.into()))?;

        gate.until(
            &mut self.browser,
            None,
            Condition::TextPresent(&login.greeting.locator, &login.greeting.text),
        )
        .await
        .map_err(at("greeting"))?;
        Ok(())
    }

    async fn capture_diagnostics(&mut self, reason: &str) -> DiagnosticSnapshot {
        let screenshot = match self.browser.screenshot().await {
            Ok(bytes) => Some(bytes),
            Err(err) => {
                warn!(error = %err, "could not capture screenshot");
                None
            }
        };
        let page_source = match self.browser.page_source().await {
            Ok(html) => Some(html),
            Err(err) => {
                warn!(error = %err, "could not capture page source");
                None
            }
        };
        DiagnosticSnapshot {
            captured_at: Utc::now(),
            reason: reason.to_string(),
            screenshot,
            page_source,
        }
    }
}
