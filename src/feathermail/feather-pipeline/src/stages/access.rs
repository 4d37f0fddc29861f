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

//! Access-control stages.

use crate::stage::{HaltReason, Stage, Verdict};
use feather_common::{Address, ClientName, IpRule, Meta, Reply};

/// Accepts a recipient when it matches any configured pattern.
#[derive(Debug)]
pub struct SimpleAccess {
    patterns: Vec<regex::Regex>,
}

impl SimpleAccess {
    ///
    #[must_use]
    pub fn new(patterns: Vec<regex::Regex>) -> Self {
        Self { patterns }
    }
}

#[async_trait::async_trait]
impl Stage for SimpleAccess {
    fn kind(&self) -> &'static str {
        "simple_access"
    }

    async fn rcpt(&mut self, rcpt: &Address, _meta: &mut Meta) -> anyhow::Result<Verdict> {
        if self.patterns.iter().any(|p| p.is_match(rcpt.full())) {
            Ok(Verdict::Continue)
        } else {
            Ok(Verdict::Halt(HaltReason::RecipientNotAllowed {
                rcpt: rcpt.clone(),
            }))
        }
    }

    fn format_reason(&self, reason: &HaltReason) -> Option<Reply> {
        match reason {
            HaltReason::RecipientNotAllowed { rcpt } => {
                format!("550 5.1.1 Recipient not allowed: {rcpt}").parse().ok()
            }
            _ => None,
        }
    }
}

/// Refuses to relay: the recipient must be local, or the peer trusted,
/// or the session authenticated.
#[derive(Debug)]
pub struct RelayControl {
    local_domains: std::collections::BTreeSet<String>,
    trusted_ips: Vec<IpRule>,
}

impl RelayControl {
    ///
    #[must_use]
    pub fn new(
        local_domains: std::collections::BTreeSet<String>,
        trusted_ips: Vec<IpRule>,
    ) -> Self {
        Self {
            local_domains,
            trusted_ips,
        }
    }
}

#[async_trait::async_trait]
impl Stage for RelayControl {
    fn kind(&self) -> &'static str {
        "relay_control"
    }

    async fn rcpt(&mut self, rcpt: &Address, meta: &mut Meta) -> anyhow::Result<Verdict> {
        let local = self.local_domains.contains(&rcpt.domain().to_lowercase());
        let trusted = self
            .trusted_ips
            .iter()
            .any(|rule| rule.matches(meta.peer_ip));

        if local || trusted || meta.user.is_some() {
            Ok(Verdict::Continue)
        } else {
            Ok(Verdict::Halt(HaltReason::RelayDenied { rcpt: rcpt.clone() }))
        }
    }

    fn format_reason(&self, reason: &HaltReason) -> Option<Reply> {
        match reason {
            HaltReason::RelayDenied { rcpt } => {
                format!("550 5.7.1 Relaying denied for {rcpt}").parse().ok()
            }
            _ => None,
        }
    }
}

/// Drops blocked source addresses at the first opportunity (HELO/EHLO).
#[derive(Debug)]
pub struct IpFilter {
    blocked_ips: Vec<IpRule>,
}

impl IpFilter {
    ///
    #[must_use]
    pub fn new(blocked_ips: Vec<IpRule>) -> Self {
        Self { blocked_ips }
    }
}

#[async_trait::async_trait]
impl Stage for IpFilter {
    fn kind(&self) -> &'static str {
        "ip_filter"
    }

    async fn helo(&mut self, _: &ClientName, meta: &mut Meta) -> anyhow::Result<Verdict> {
        if self
            .blocked_ips
            .iter()
            .any(|rule| rule.matches(meta.peer_ip))
        {
            Ok(Verdict::Halt(HaltReason::IpAccessDenied))
        } else {
            Ok(Verdict::Continue)
        }
    }

    fn format_reason(&self, reason: &HaltReason) -> Option<Reply> {
        match reason {
            HaltReason::IpAccessDenied => {
                "554 5.7.1 Access denied from your IP address".parse().ok()
            }
            _ => None,
        }
    }
}

/// Vets the sender domain at MAIL FROM.
#[derive(Debug)]
pub struct SenderDomainValidator {
    allowed_domains: std::collections::BTreeSet<String>,
    require_auth_for_relay: bool,
}

impl SenderDomainValidator {
    ///
    #[must_use]
    pub fn new(
        allowed_domains: std::collections::BTreeSet<String>,
        require_auth_for_relay: bool,
    ) -> Self {
        Self {
            allowed_domains,
            require_auth_for_relay,
        }
    }
}

#[async_trait::async_trait]
impl Stage for SenderDomainValidator {
    fn kind(&self) -> &'static str {
        "sender_domain_validator"
    }

    async fn mail(&mut self, from: Option<&Address>, meta: &mut Meta) -> anyhow::Result<Verdict> {
        if self.require_auth_for_relay && meta.is_authenticated() {
            return Ok(Verdict::Continue);
        }

        if let Some(from) = from {
            if self
                .allowed_domains
                .contains(&from.domain().to_lowercase())
            {
                return Ok(Verdict::Continue);
            }
        }

        Ok(Verdict::Halt(HaltReason::SenderNotAuthorized {
            from: from.map_or_else(|| "<>".to_string(), |f| f.full().to_string()),
        }))
    }

    fn format_reason(&self, reason: &HaltReason) -> Option<Reply> {
        match reason {
            HaltReason::SenderNotAuthorized { from } => {
                format!("550 5.7.1 Sender domain not authorized for relay: {from}")
                    .parse()
                    .ok()
            }
            _ => None,
        }
    }
}

/// Typed configuration of one [`Guard`].
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum GuardConfig {
    /// Static list of known local parts or full addresses.
    Static {
        /// The known users.
        users: Vec<String>,
    },
    /// Patterns over the full address.
    Regex {
        /// The patterns.
        patterns: Vec<String>,
    },
    /// A maildir exists under `<root>/<local part>`.
    Maildir {
        /// Maildir root folder.
        root: std::path::PathBuf,
    },
    /// The local part is an alias key of the given file.
    AliasFile {
        /// Path of the alias file, read at session start.
        path: std::path::PathBuf,
    },
}

impl GuardConfig {
    /// Validate without touching the filesystem.
    ///
    /// # Errors
    ///
    /// * a pattern does not compile
    pub fn validate(&self) -> anyhow::Result<()> {
        if let Self::Regex { patterns } = self {
            for pattern in patterns {
                regex::Regex::new(pattern)?;
            }
        }
        Ok(())
    }

    /// Instantiate the guard. Missing files are tolerated (empty guard).
    ///
    /// # Errors
    ///
    /// * a pattern does not compile
    pub fn build(&self) -> anyhow::Result<Guard> {
        Ok(match self {
            Self::Static { users } => Guard::Static(users.iter().cloned().collect()),
            Self::Regex { patterns } => Guard::Regex(
                patterns
                    .iter()
                    .map(|p| regex::Regex::new(p))
                    .collect::<Result<_, _>>()?,
            ),
            Self::Maildir { root } => Guard::Maildir(root.clone()),
            Self::AliasFile { path } => {
                let aliases = match std::fs::read_to_string(path) {
                    Ok(content) => crate::transform::parse_alias_file(&content)
                        .into_keys()
                        .collect(),
                    Err(error) => {
                        tracing::warn!(path = %path.display(), %error, "Alias file unreadable, guard starts empty.");
                        std::collections::BTreeSet::new()
                    }
                };
                Guard::AliasFile(aliases)
            }
        })
    }
}

/// One pluggable recipient-existence oracle of the [`BackscatterGuard`].
#[derive(Debug)]
pub enum Guard {
    /// Static list of known local parts or full addresses.
    Static(std::collections::BTreeSet<String>),
    /// Patterns over the full address.
    Regex(Vec<regex::Regex>),
    /// A maildir exists under `<root>/<local part>`.
    Maildir(std::path::PathBuf),
    /// The local part is an alias key of the given file.
    AliasFile(std::collections::BTreeSet<String>),
}

impl Guard {
    fn knows(&self, rcpt: &Address) -> bool {
        match self {
            Self::Static(known) => {
                known.contains(rcpt.local_part()) || known.contains(rcpt.full())
            }
            Self::Regex(patterns) => patterns.iter().any(|p| p.is_match(rcpt.full())),
            Self::Maildir(root) => root.join(rcpt.local_part()).is_dir(),
            Self::AliasFile(aliases) => aliases.contains(rcpt.local_part()),
        }
    }
}

/// Refuses recipients no guard vouches for, the classic backscatter
/// defence.
#[derive(Debug)]
pub struct BackscatterGuard {
    guards: Vec<Guard>,
}

impl BackscatterGuard {
    ///
    #[must_use]
    pub fn new(guards: Vec<Guard>) -> Self {
        Self { guards }
    }
}

#[async_trait::async_trait]
impl Stage for BackscatterGuard {
    fn kind(&self) -> &'static str {
        "backscatter_guard"
    }

    async fn rcpt(&mut self, rcpt: &Address, _meta: &mut Meta) -> anyhow::Result<Verdict> {
        if self.guards.iter().any(|guard| guard.knows(rcpt)) {
            Ok(Verdict::Continue)
        } else {
            Ok(Verdict::Halt(HaltReason::UserUnknown { rcpt: rcpt.clone() }))
        }
    }

    fn format_reason(&self, reason: &HaltReason) -> Option<Reply> {
        match reason {
            HaltReason::UserUnknown { rcpt } => {
                format!("550 5.1.1 User unknown: {rcpt}").parse().ok()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use feather_common::addr;

    fn meta_from(peer: &str) -> Meta {
        Meta::new(peer.parse().unwrap())
    }

    #[tokio::test]
    async fn simple_access() {
        let mut stage = SimpleAccess::new(vec![regex::Regex::new("@example.com$").unwrap()]);
        let mut meta = meta_from("192.0.2.1");

        assert_eq!(
            stage
                .rcpt(&addr!("bob@example.com"), &mut meta)
                .await
                .unwrap(),
            Verdict::Continue
        );

        let verdict = stage
            .rcpt(&addr!("bob@elsewhere.com"), &mut meta)
            .await
            .unwrap();
        let Verdict::Halt(reason) = verdict else {
            panic!("expected a halt")
        };
        assert_eq!(
            stage.format_reason(&reason).unwrap().fold(),
            "550 5.1.1 Recipient not allowed: bob@elsewhere.com\r\n"
        );
    }

    #[rstest::rstest]
    // local recipient is always accepted
    #[case("203.0.113.7", None, "bob@example.com", true)]
    // relaying from an untrusted, unauthenticated peer is denied
    #[case("203.0.113.7", None, "bob@elsewhere.com", false)]
    // trusted peer may relay
    #[case("127.0.0.1", None, "bob@elsewhere.com", true)]
    // authenticated user may relay
    #[case("203.0.113.7", Some("alice"), "bob@elsewhere.com", true)]
    #[tokio::test]
    async fn relay_control(
        #[case] peer: &str,
        #[case] user: Option<&str>,
        #[case] rcpt: &str,
        #[case] accepted: bool,
    ) {
        let mut stage = RelayControl::new(
            ["example.com".to_string()].into_iter().collect(),
            vec!["localhost".parse().unwrap()],
        );
        let mut meta = meta_from(peer);
        meta.user = user.map(ToString::to_string);

        let verdict = stage.rcpt(&addr!(rcpt), &mut meta).await.unwrap();
        assert_eq!(matches!(verdict, Verdict::Continue), accepted);
    }

    #[tokio::test]
    async fn ip_filter_blocks() {
        let mut stage = IpFilter::new(vec!["203.0.113.0/24".parse().unwrap()]);

        let mut meta = meta_from("203.0.113.7");
        let verdict = stage
            .helo(&ClientName::Domain("x".to_string()), &mut meta)
            .await
            .unwrap();
        let Verdict::Halt(reason) = verdict else {
            panic!("expected a halt")
        };
        assert_eq!(
            stage.format_reason(&reason).unwrap().fold(),
            "554 5.7.1 Access denied from your IP address\r\n"
        );

        let mut meta = meta_from("198.51.100.1");
        assert_eq!(
            stage
                .helo(&ClientName::Domain("x".to_string()), &mut meta)
                .await
                .unwrap(),
            Verdict::Continue
        );
    }

    #[rstest::rstest]
    // allowed domain passes unauthenticated
    #[case(Some("alice@example.com"), false, true)]
    // unknown domain is refused
    #[case(Some("alice@elsewhere.com"), false, false)]
    // authentication opens the gate when the flag is set
    #[case(Some("alice@elsewhere.com"), true, true)]
    // the null sender is refused unless authenticated
    #[case(None, false, false)]
    #[tokio::test]
    async fn sender_domain_validator(
        #[case] from: Option<&str>,
        #[case] authenticated: bool,
        #[case] accepted: bool,
    ) {
        let mut stage = SenderDomainValidator::new(
            ["example.com".to_string()].into_iter().collect(),
            true,
        );
        let mut meta = meta_from("203.0.113.7");
        meta.authenticated = authenticated;
        if authenticated {
            meta.user = Some("alice".to_string());
        }

        let from = from.map(|f| addr!(f));
        let verdict = stage.mail(from.as_ref(), &mut meta).await.unwrap();
        assert_eq!(matches!(verdict, Verdict::Continue), accepted);
    }

    #[tokio::test]
    async fn backscatter_guards() {
        let dir = std::env::temp_dir().join(format!("feather-guard-{:08x}", rand::random::<u32>()));
        std::fs::create_dir_all(dir.join("carol")).unwrap();

        let mut stage = BackscatterGuard::new(vec![
            Guard::Static(["postmaster".to_string()].into_iter().collect()),
            Guard::Regex(vec![regex::Regex::new("^info@").unwrap()]),
            Guard::Maildir(dir.clone()),
            Guard::AliasFile(["sales".to_string()].into_iter().collect()),
        ]);
        let mut meta = meta_from("192.0.2.1");

        for known in [
            "postmaster@example.com",
            "info@example.com",
            "carol@example.com",
            "sales@example.com",
        ] {
            assert_eq!(
                stage.rcpt(&addr!(known), &mut meta).await.unwrap(),
                Verdict::Continue,
                "{known} should be known"
            );
        }

        let verdict = stage.rcpt(&addr!("ghost@example.com"), &mut meta).await.unwrap();
        let Verdict::Halt(reason) = verdict else {
            panic!("expected a halt")
        };
        assert_eq!(
            stage.format_reason(&reason).unwrap().fold(),
            "550 5.1.1 User unknown: ghost@example.com\r\n"
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
