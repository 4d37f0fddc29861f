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

//! Rate and quantity limiting stages. The cross-session counters live in
//! the TTL store; a store failure never blocks mail (fail-open).

use crate::stage::{HaltReason, Stage, Verdict};
use feather_common::{Address, IpRule, Meta, Reply};
use feather_store::TtlStore;

fn window_display(window: std::time::Duration) -> String {
    humantime::format_duration(window).to_string()
}

/// Caps how many messages one client address may submit per window.
#[derive(Debug)]
pub struct MessageRateLimit {
    store: std::sync::Arc<TtlStore>,
    max_messages: i64,
    time_window: std::time::Duration,
    exempt_ips: Vec<IpRule>,
}

impl MessageRateLimit {
    ///
    #[must_use]
    pub fn new(
        store: std::sync::Arc<TtlStore>,
        max_messages: i64,
        time_window: std::time::Duration,
        exempt_ips: Vec<IpRule>,
    ) -> Self {
        Self {
            store,
            max_messages,
            time_window,
            exempt_ips,
        }
    }
}

#[async_trait::async_trait]
impl Stage for MessageRateLimit {
    fn kind(&self) -> &'static str {
        "message_rate_limit"
    }

    async fn mail(&mut self, _: Option<&Address>, meta: &mut Meta) -> anyhow::Result<Verdict> {
        if self.exempt_ips.iter().any(|rule| rule.matches(meta.peer_ip)) {
            return Ok(Verdict::Continue);
        }

        let key = format!("ratelimit:ip:{}", meta.peer_ip);
        let count = match self.store.increment(&key, 1, Some(self.time_window)) {
            Ok(count) => count,
            Err(error) => {
                // fail-open: a storage problem must not block mail
                tracing::warn!(%error, "Rate limit storage failure, skipping the limit.");
                return Ok(Verdict::Continue);
            }
        };

        if count > self.max_messages {
            Ok(Verdict::Halt(HaltReason::IpRateLimitExceeded {
                max: self.max_messages,
                window: self.time_window,
            }))
        } else {
            Ok(Verdict::Continue)
        }
    }

    fn format_reason(&self, reason: &HaltReason) -> Option<Reply> {
        match reason {
            HaltReason::IpRateLimitExceeded { max, window } => format!(
                "450 4.7.1 Rate limit exceeded: too many messages from your IP (max: {max} per {})",
                window_display(*window)
            )
            .parse()
            .ok(),
            _ => None,
        }
    }
}

/// Caps how many messages one authenticated user may submit per window.
#[derive(Debug)]
pub struct UserRateLimit {
    store: std::sync::Arc<TtlStore>,
    max_messages: i64,
    time_window: std::time::Duration,
    exempt_users: std::collections::BTreeSet<String>,
}

impl UserRateLimit {
    ///
    #[must_use]
    pub fn new(
        store: std::sync::Arc<TtlStore>,
        max_messages: i64,
        time_window: std::time::Duration,
        exempt_users: std::collections::BTreeSet<String>,
    ) -> Self {
        Self {
            store,
            max_messages,
            time_window,
            exempt_users,
        }
    }
}

#[async_trait::async_trait]
impl Stage for UserRateLimit {
    fn kind(&self) -> &'static str {
        "user_rate_limit"
    }

    async fn mail(&mut self, _: Option<&Address>, meta: &mut Meta) -> anyhow::Result<Verdict> {
        let Some(user) = meta.user.clone() else {
            // only applies to authenticated sessions
            return Ok(Verdict::Continue);
        };
        if self.exempt_users.contains(&user) {
            return Ok(Verdict::Continue);
        }

        let key = format!("ratelimit:user:{user}");
        let count = match self.store.increment(&key, 1, Some(self.time_window)) {
            Ok(count) => count,
            Err(error) => {
                tracing::warn!(%error, "Rate limit storage failure, skipping the limit.");
                return Ok(Verdict::Continue);
            }
        };

        if count > self.max_messages {
            Ok(Verdict::Halt(HaltReason::UserRateLimitExceeded {
                user,
                max: self.max_messages,
                window: self.time_window,
            }))
        } else {
            Ok(Verdict::Continue)
        }
    }

    fn format_reason(&self, reason: &HaltReason) -> Option<Reply> {
        match reason {
            HaltReason::UserRateLimitExceeded { user, max, window } => format!(
                "450 4.7.1 Rate limit exceeded: too many messages from user '{user}' (max: {max} per {})",
                window_display(*window)
            )
            .parse()
            .ok(),
            _ => None,
        }
    }
}

/// Caps the recipients of one transaction; the counter is per-session
/// private state.
#[derive(Debug)]
pub struct RecipientLimit {
    max_recipients: usize,
    authenticated_max_recipients: Option<usize>,
    accepted: usize,
}

impl RecipientLimit {
    ///
    #[must_use]
    pub fn new(max_recipients: usize, authenticated_max_recipients: Option<usize>) -> Self {
        Self {
            max_recipients,
            authenticated_max_recipients,
            accepted: 0,
        }
    }

    fn limit_for(&self, meta: &Meta) -> usize {
        if meta.is_authenticated() {
            self.authenticated_max_recipients
                .unwrap_or(self.max_recipients)
        } else {
            self.max_recipients
        }
    }
}

#[async_trait::async_trait]
impl Stage for RecipientLimit {
    fn kind(&self) -> &'static str {
        "recipient_limit"
    }

    async fn rcpt(&mut self, _: &Address, meta: &mut Meta) -> anyhow::Result<Verdict> {
        let max = self.limit_for(meta);
        if self.accepted >= max {
            return Ok(Verdict::Halt(HaltReason::TooManyRecipients { max }));
        }
        self.accepted += 1;
        Ok(Verdict::Continue)
    }

    async fn data(&mut self, _: &[u8], _: &mut Meta) -> anyhow::Result<Verdict> {
        // next transaction starts over
        self.accepted = 0;
        Ok(Verdict::Continue)
    }

    fn format_reason(&self, reason: &HaltReason) -> Option<Reply> {
        match reason {
            HaltReason::TooManyRecipients { max } => {
                format!("452 4.5.3 Too many recipients (max: {max})").parse().ok()
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

    fn store() -> std::sync::Arc<TtlStore> {
        std::sync::Arc::new(TtlStore::new())
    }

    // after K submissions with limit L, attempts L+1.. halt and earlier
    // ones continue
    #[tokio::test]
    async fn ip_rate_limit_sequence() {
        let mut stage = MessageRateLimit::new(
            store(),
            2,
            std::time::Duration::from_secs(60),
            vec![],
        );
        let mut meta = meta_from("203.0.113.7");

        for _ in 0..2 {
            assert_eq!(
                stage.mail(None, &mut meta).await.unwrap(),
                Verdict::Continue
            );
        }

        let verdict = stage.mail(None, &mut meta).await.unwrap();
        let Verdict::Halt(reason) = verdict else {
            panic!("expected a halt")
        };
        assert_eq!(
            stage.format_reason(&reason).unwrap().fold(),
            "450 4.7.1 Rate limit exceeded: too many messages from your IP (max: 2 per 1m)\r\n"
        );
    }

    #[tokio::test]
    async fn ip_rate_limit_is_per_peer() {
        let store = store();
        let mut stage =
            MessageRateLimit::new(store.clone(), 1, std::time::Duration::from_secs(60), vec![]);

        let mut first = meta_from("203.0.113.7");
        let mut second = meta_from("203.0.113.8");

        assert_eq!(stage.mail(None, &mut first).await.unwrap(), Verdict::Continue);
        assert!(matches!(
            stage.mail(None, &mut first).await.unwrap(),
            Verdict::Halt(_)
        ));
        // another peer has its own counter
        assert_eq!(
            stage.mail(None, &mut second).await.unwrap(),
            Verdict::Continue
        );
    }

    #[tokio::test]
    async fn exempt_ip_is_never_limited() {
        let mut stage = MessageRateLimit::new(
            store(),
            1,
            std::time::Duration::from_secs(60),
            vec!["localhost".parse().unwrap()],
        );
        let mut meta = meta_from("127.0.0.1");

        for _ in 0..5 {
            assert_eq!(
                stage.mail(None, &mut meta).await.unwrap(),
                Verdict::Continue
            );
        }
    }

    #[tokio::test]
    async fn rate_limit_fails_open_on_bad_storage() {
        let store = store();
        store.put("ratelimit:ip:203.0.113.7", "corrupted", None);

        let mut stage =
            MessageRateLimit::new(store, 1, std::time::Duration::from_secs(60), vec![]);
        let mut meta = meta_from("203.0.113.7");

        for _ in 0..3 {
            assert_eq!(
                stage.mail(None, &mut meta).await.unwrap(),
                Verdict::Continue
            );
        }
    }

    #[tokio::test]
    async fn user_rate_limit() {
        let mut stage = UserRateLimit::new(
            store(),
            1,
            std::time::Duration::from_secs(120),
            ["batch".to_string()].into_iter().collect(),
        );

        // anonymous sessions are not limited
        let mut anonymous = meta_from("203.0.113.7");
        for _ in 0..3 {
            assert_eq!(
                stage.mail(None, &mut anonymous).await.unwrap(),
                Verdict::Continue
            );
        }

        let mut alice = meta_from("203.0.113.7");
        alice.user = Some("alice".to_string());
        assert_eq!(stage.mail(None, &mut alice).await.unwrap(), Verdict::Continue);

        let verdict = stage.mail(None, &mut alice).await.unwrap();
        let Verdict::Halt(reason) = verdict else {
            panic!("expected a halt")
        };
        assert_eq!(
            stage.format_reason(&reason).unwrap().fold(),
            "450 4.7.1 Rate limit exceeded: too many messages from user 'alice' (max: 1 per 2m)\r\n"
        );

        // exempt user
        let mut batch = meta_from("203.0.113.7");
        batch.user = Some("batch".to_string());
        for _ in 0..3 {
            assert_eq!(stage.mail(None, &mut batch).await.unwrap(), Verdict::Continue);
        }
    }

    #[tokio::test]
    async fn recipient_limit_per_session() {
        let mut stage = RecipientLimit::new(2, None);
        let mut meta = meta_from("203.0.113.7");

        for rcpt in ["a@example.com", "b@example.com"] {
            assert_eq!(
                stage.rcpt(&addr!(rcpt), &mut meta).await.unwrap(),
                Verdict::Continue
            );
        }

        let verdict = stage.rcpt(&addr!("c@example.com"), &mut meta).await.unwrap();
        let Verdict::Halt(reason) = verdict else {
            panic!("expected a halt")
        };
        assert_eq!(
            stage.format_reason(&reason).unwrap().fold(),
            "452 4.5.3 Too many recipients (max: 2)\r\n"
        );

        // the counter resets with the transaction
        stage.data(b"", &mut meta).await.unwrap();
        assert_eq!(
            stage.rcpt(&addr!("d@example.com"), &mut meta).await.unwrap(),
            Verdict::Continue
        );
    }

    #[tokio::test]
    async fn recipient_limit_authenticated_tier() {
        let mut stage = RecipientLimit::new(1, Some(3));
        let mut meta = meta_from("203.0.113.7");
        meta.authenticated = true;
        meta.user = Some("alice".to_string());

        for rcpt in ["a@example.com", "b@example.com", "c@example.com"] {
            assert_eq!(
                stage.rcpt(&addr!(rcpt), &mut meta).await.unwrap(),
                Verdict::Continue
            );
        }
        assert!(matches!(
            stage.rcpt(&addr!("d@example.com"), &mut meta).await.unwrap(),
            Verdict::Halt(_)
        ));
    }
}
