/*
 * FeatherMail SMTP server framework
 * Copyright (C) 2022 viridIT SAS
 *
 * This program is free software: you can redistribute it and/or modify it under
 * the terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or any later version.
 *
 * This program is distributed in the hope that it will be useful, but WITHOUT
 * ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
 * FOR A PARTICULAR PURPOSE.  See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * this program. If not, see https://www.gnu.org/licenses/.
 *
*/

//! Authentication stages. On success they set `meta.user` and
//! `meta.authenticated`, which the engine's MAIL FROM wall relies on.

use crate::stage::{HaltReason, Stage, Verdict};
use feather_common::auth::Credentials;
use feather_common::{Address, ClientName, Meta, Reply};

fn grant(meta: &mut Meta, user: impl Into<String>) {
    meta.authenticated = true;
    meta.user = Some(user.into());
}

/// Authentication against a static `user → password` table.
#[derive(Debug)]
pub struct SimpleAuth {
    users: std::collections::BTreeMap<String, String>,
}

impl SimpleAuth {
    ///
    #[must_use]
    pub fn new(users: std::collections::BTreeMap<String, String>) -> Self {
        Self { users }
    }
}

#[async_trait::async_trait]
impl Stage for SimpleAuth {
    fn kind(&self) -> &'static str {
        "simple_auth"
    }

    async fn auth(&mut self, credentials: &Credentials, meta: &mut Meta) -> anyhow::Result<Verdict> {
        if self.users.get(&credentials.authid) == Some(&credentials.authpass) {
            grant(meta, credentials.authid.clone());
            Ok(Verdict::Continue)
        } else {
            Ok(Verdict::Halt(HaltReason::InvalidCredentials))
        }
    }

    fn format_reason(&self, reason: &HaltReason) -> Option<Reply> {
        match reason {
            HaltReason::InvalidCredentials => "535 Authentication failed".parse().ok(),
            _ => None,
        }
    }
}

/// Authentication of provisioned accounts: the client password is an
/// AES-256-GCM envelope, the decrypted value is checked against the
/// bcrypt hash stored in the keystore.
#[derive(Debug)]
pub struct ProvisionedAuth {
    keystore: feather_auth::Keystore,
    secret_key: String,
}

impl ProvisionedAuth {
    ///
    #[must_use]
    pub fn new(keystore: feather_auth::Keystore, secret_key: String) -> Self {
        Self {
            keystore,
            secret_key,
        }
    }
}

#[async_trait::async_trait]
impl Stage for ProvisionedAuth {
    fn kind(&self) -> &'static str {
        "provisioned_auth"
    }

    async fn auth(&mut self, credentials: &Credentials, meta: &mut Meta) -> anyhow::Result<Verdict> {
        let password = match feather_auth::decrypt_password(&credentials.authpass, &self.secret_key)
        {
            Ok(password) => password,
            Err(error) => {
                tracing::debug!(user = credentials.authid, %error, "Password envelope rejected.");
                return Ok(Verdict::Halt(HaltReason::InvalidCredentials));
            }
        };

        if self.keystore.verify(&credentials.authid, &password) {
            grant(meta, credentials.authid.clone());
            Ok(Verdict::Continue)
        } else {
            Ok(Verdict::Halt(HaltReason::InvalidCredentials))
        }
    }

    fn format_reason(&self, reason: &HaltReason) -> Option<Reply> {
        match reason {
            HaltReason::InvalidCredentials => "535 Authentication failed".parse().ok(),
            _ => None,
        }
    }
}

/// Authentication through an external `pam_auth <user> <pass>` helper;
/// exit code 0 grants access.
#[derive(Debug)]
pub struct PamAuth {
    helper: std::path::PathBuf,
}

impl PamAuth {
    ///
    #[must_use]
    pub fn new(helper: std::path::PathBuf) -> Self {
        Self { helper }
    }
}

#[async_trait::async_trait]
impl Stage for PamAuth {
    fn kind(&self) -> &'static str {
        "pam_auth"
    }

    async fn auth(&mut self, credentials: &Credentials, meta: &mut Meta) -> anyhow::Result<Verdict> {
        let output = tokio::process::Command::new(&self.helper)
            .arg(&credentials.authid)
            .arg(&credentials.authpass)
            .output()
            .await?;

        if output.status.success() {
            grant(meta, credentials.authid.clone());
            return Ok(Verdict::Continue);
        }

        let mut combined = String::from_utf8_lossy(&output.stdout).trim().to_string();
        combined.push_str(String::from_utf8_lossy(&output.stderr).trim());

        Ok(Verdict::Halt(HaltReason::AuthHelperFailed {
            output: combined,
            code: output.status.code().unwrap_or(-1),
        }))
    }

    fn format_reason(&self, reason: &HaltReason) -> Option<Reply> {
        match reason {
            HaltReason::AuthHelperFailed { output, .. } => {
                format!("535 Authentication failed: {output}").parse().ok()
            }
            _ => None,
        }
    }
}

/// Explicit authentication bypass: marks every session authenticated as
/// a fixed trusted identity, and passes the mail phase through so the
/// engine's authentication wall opens.
#[derive(Debug)]
pub struct NoAuth {
    user: String,
}

impl NoAuth {
    /// Default trusted identity.
    pub const DEFAULT_USER: &'static str = "trusted@localhost";

    ///
    #[must_use]
    pub fn new(user: Option<String>) -> Self {
        Self {
            user: user.unwrap_or_else(|| Self::DEFAULT_USER.to_string()),
        }
    }
}

#[async_trait::async_trait]
impl Stage for NoAuth {
    fn kind(&self) -> &'static str {
        "no_auth"
    }

    async fn helo(&mut self, _: &ClientName, meta: &mut Meta) -> anyhow::Result<Verdict> {
        grant(meta, self.user.clone());
        Ok(Verdict::Continue)
    }

    async fn auth(&mut self, _: &Credentials, meta: &mut Meta) -> anyhow::Result<Verdict> {
        grant(meta, self.user.clone());
        Ok(Verdict::Continue)
    }

    async fn mail(&mut self, _: Option<&Address>, meta: &mut Meta) -> anyhow::Result<Verdict> {
        grant(meta, self.user.clone());
        Ok(Verdict::Continue)
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::stage::{dispatch, DispatchOutcome, Event};

    fn credentials(user: &str, pass: &str) -> Credentials {
        Credentials {
            authid: user.to_string(),
            authpass: pass.to_string(),
        }
    }

    fn meta() -> Meta {
        Meta::new("192.0.2.1".parse().unwrap())
    }

    #[tokio::test]
    async fn simple_auth_grants() {
        let mut stages: Vec<Box<dyn Stage>> = vec![Box::new(SimpleAuth::new(
            [("alice".to_string(), "secret".to_string())]
                .into_iter()
                .collect(),
        ))];
        let mut meta = meta();

        let outcome = dispatch(
            &mut stages,
            &mut meta,
            &Event::Auth(&credentials("alice", "secret")),
        )
        .await;
        assert_eq!(outcome, DispatchOutcome::Continue);
        assert!(meta.authenticated);
        assert_eq!(meta.user.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn simple_auth_rejects() {
        let mut stages: Vec<Box<dyn Stage>> = vec![Box::new(SimpleAuth::new(
            [("alice".to_string(), "secret".to_string())]
                .into_iter()
                .collect(),
        ))];
        let mut meta = meta();

        match dispatch(
            &mut stages,
            &mut meta,
            &Event::Auth(&credentials("alice", "wrong")),
        )
        .await
        {
            DispatchOutcome::Halt(reply) => {
                assert_eq!(reply.fold(), "535 Authentication failed\r\n");
            }
            DispatchOutcome::Continue => panic!("expected a halt"),
        }
        assert!(!meta.authenticated);
    }

    #[tokio::test]
    async fn no_auth_marks_trusted() {
        let mut stage = NoAuth::new(None);
        let mut meta = meta();

        let verdict = stage
            .helo(&ClientName::Domain("x".to_string()), &mut meta)
            .await
            .unwrap();
        assert_eq!(verdict, Verdict::Continue);
        assert!(meta.authenticated);
        assert_eq!(meta.user.as_deref(), Some(NoAuth::DEFAULT_USER));
    }

    #[tokio::test]
    async fn pam_auth_success_and_failure() {
        // `true` and `false` are enough of a PAM helper for the contract
        let mut ok = PamAuth::new(std::path::PathBuf::from("/bin/true"));
        let mut meta = meta();
        assert_eq!(
            ok.auth(&credentials("alice", "x"), &mut meta).await.unwrap(),
            Verdict::Continue
        );
        assert_eq!(meta.user.as_deref(), Some("alice"));

        let mut ko = PamAuth::new(std::path::PathBuf::from("/bin/false"));
        let mut meta = self::meta();
        assert!(matches!(
            ko.auth(&credentials("alice", "x"), &mut meta).await.unwrap(),
            Verdict::Halt(HaltReason::AuthHelperFailed { code: 1, .. })
        ));
    }

    #[tokio::test]
    async fn pam_auth_missing_helper_is_infrastructure() {
        let mut stage = PamAuth::new(std::path::PathBuf::from("/nonexistent/pam_auth"));
        let mut meta = meta();
        assert!(stage.auth(&credentials("a", "b"), &mut meta).await.is_err());
    }

    #[tokio::test]
    async fn provisioned_auth_rejects_garbage_envelope() {
        let mut stage = ProvisionedAuth::new(feather_auth::Keystore::default(), "k".to_string());
        let mut meta = meta();
        assert!(matches!(
            stage
                .auth(&credentials("alice", "not-an-envelope"), &mut meta)
                .await
                .unwrap(),
            Verdict::Halt(HaltReason::InvalidCredentials)
        ));
    }
}
