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

use feather_common::auth::Credentials;
use feather_common::{Address, ClientName, CodeId, Meta, Reply, ReplyCode, TerminateReason};

/// What a stage hook decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// Let the event flow to the next stage.
    Continue,
    /// Stop the phase; the remaining stages do not observe the event.
    Halt(HaltReason),
}

/// The enumerated halt reasons of the reference stages.
///
/// A stage turns its own reasons into replies through
/// [`Stage::format_reason`]; a reason left unformatted becomes
/// `550 <debug>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HaltReason {
    /// Credentials did not verify.
    InvalidCredentials,
    /// An external authentication helper rejected the credentials.
    AuthHelperFailed {
        /// Helper stdout/stderr.
        output: String,
        /// Helper exit code.
        code: i32,
    },
    /// Recipient refused by an access list.
    RecipientNotAllowed {
        /// The refused recipient.
        rcpt: Address,
    },
    /// Relaying refused for this recipient.
    RelayDenied {
        /// The refused recipient.
        rcpt: Address,
    },
    /// The peer address is blocked.
    IpAccessDenied,
    /// The sender domain is not allowed to relay.
    SenderNotAuthorized {
        /// Display form of the envelope sender.
        from: String,
    },
    /// No guard vouched for this recipient.
    UserUnknown {
        /// The unknown recipient.
        rcpt: Address,
    },
    /// Too many messages from one client address.
    IpRateLimitExceeded {
        /// Configured ceiling.
        max: i64,
        /// Window the ceiling applies to.
        window: std::time::Duration,
    },
    /// Too many messages from one authenticated user.
    UserRateLimitExceeded {
        /// The user.
        user: String,
        /// Configured ceiling.
        max: i64,
        /// Window the ceiling applies to.
        window: std::time::Duration,
    },
    /// Too many recipients in this transaction.
    TooManyRecipients {
        /// Configured ceiling.
        max: usize,
    },
    /// No route matches the recipient domain.
    NoRoute {
        /// The unrouted domain.
        domain: String,
    },
    /// Infrastructure trouble, the client should retry.
    Transient {
        /// Cause, shown to the client.
        message: String,
    },
    /// The message can never be delivered as addressed.
    Permanent {
        /// Cause, shown to the client.
        message: String,
    },
}

/// A protocol event walked through the pipeline.
#[derive(Debug)]
pub enum Event<'a> {
    /// HELO/EHLO.
    Helo(&'a ClientName),
    /// AUTH credentials, decoded.
    Auth(&'a Credentials),
    /// MAIL FROM; `None` is the null reverse path.
    Mail(Option<&'a Address>),
    /// One RCPT TO.
    Rcpt(&'a Address),
    /// End-of-data, with the whole message.
    Data(&'a [u8]),
}

/// A pipeline element.
///
/// Every hook is optional: the default bodies pass the event through
/// untouched. Hooks mutate the shared [`Meta`] in place and their own
/// `self` is the stage's private state, invisible to the other stages.
/// An `Err` is an infrastructure failure, not a policy decision; the
/// engine turns it into a `451`.
#[async_trait::async_trait]
pub trait Stage: Send + std::fmt::Debug {
    /// The registry identifier of this stage.
    fn kind(&self) -> &'static str;

    /// HELO/EHLO hook.
    async fn helo(&mut self, _client_name: &ClientName, _meta: &mut Meta) -> anyhow::Result<Verdict> {
        Ok(Verdict::Continue)
    }

    /// AUTH hook; an authenticating stage sets `meta.authenticated` and
    /// `meta.user` on success.
    async fn auth(&mut self, _credentials: &Credentials, _meta: &mut Meta) -> anyhow::Result<Verdict> {
        Ok(Verdict::Continue)
    }

    /// MAIL FROM hook.
    async fn mail(&mut self, _from: Option<&Address>, _meta: &mut Meta) -> anyhow::Result<Verdict> {
        Ok(Verdict::Continue)
    }

    /// RCPT TO hook.
    async fn rcpt(&mut self, _rcpt: &Address, _meta: &mut Meta) -> anyhow::Result<Verdict> {
        Ok(Verdict::Continue)
    }

    /// End-of-data hook.
    async fn data(&mut self, _raw: &[u8], _meta: &mut Meta) -> anyhow::Result<Verdict> {
        Ok(Verdict::Continue)
    }

    /// Session teardown; runs once, in pipeline order, whatever the
    /// reason.
    async fn terminate(&mut self, _reason: TerminateReason, _meta: &Meta) {}

    /// Turn one of this stage's halt reasons into a full reply; `None`
    /// falls back to the engine default.
    fn format_reason(&self, _reason: &HaltReason) -> Option<Reply> {
        None
    }
}

/// Outcome of walking one event through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every participating stage let the event through.
    Continue,
    /// A stage halted; the reply to send.
    Halt(Reply),
}

/// Walk `event` through `stages` in order.
///
/// The first halt wins: remaining stages are not invoked, meta mutations
/// made so far persist (including the halting stage's), and the reply is
/// the halting stage's formatted reason or the `550 <debug>` default.
pub async fn dispatch(
    stages: &mut [Box<dyn Stage>],
    meta: &mut Meta,
    event: &Event<'_>,
) -> DispatchOutcome {
    for stage in stages.iter_mut() {
        let verdict = match event {
            Event::Helo(client_name) => stage.helo(client_name, meta).await,
            Event::Auth(credentials) => stage.auth(credentials, meta).await,
            Event::Mail(from) => stage.mail(*from, meta).await,
            Event::Rcpt(rcpt) => stage.rcpt(rcpt, meta).await,
            Event::Data(raw) => stage.data(raw, meta).await,
        };

        match verdict {
            Ok(Verdict::Continue) => {}
            Ok(Verdict::Halt(reason)) => {
                tracing::debug!(stage = stage.kind(), ?reason, "Stage halted the event.");
                let reply = stage.format_reason(&reason).unwrap_or_else(|| {
                    Reply::new(ReplyCode::Code { code: 550 }, format!("{reason:?}"))
                });
                return DispatchOutcome::Halt(reply);
            }
            Err(error) => {
                tracing::error!(stage = stage.kind(), %error, "Stage hook failure.");
                return DispatchOutcome::Halt(CodeId::InternalError.default_reply());
            }
        }
    }
    DispatchOutcome::Continue
}

/// Run every stage's `terminate` hook, in pipeline order. Return values
/// are ignored by contract.
pub async fn terminate_all(
    stages: &mut [Box<dyn Stage>],
    reason: TerminateReason,
    meta: &Meta,
) {
    for stage in stages.iter_mut() {
        stage.terminate(reason, meta).await;
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    /// Probe stage recording which hooks ran.
    #[derive(Debug, Default)]
    struct Probe {
        name: &'static str,
        seen: Vec<&'static str>,
        halt_on_mail: bool,
    }

    impl Probe {
        fn named(name: &'static str) -> Self {
            Self {
                name,
                ..Self::default()
            }
        }
    }

    #[async_trait::async_trait]
    impl Stage for Probe {
        fn kind(&self) -> &'static str {
            "probe"
        }

        async fn helo(&mut self, _: &ClientName, _: &mut Meta) -> anyhow::Result<Verdict> {
            self.seen.push("helo");
            Ok(Verdict::Continue)
        }

        async fn mail(&mut self, _: Option<&Address>, meta: &mut Meta) -> anyhow::Result<Verdict> {
            self.seen.push("mail");
            meta.extra
                .insert(format!("probe.{}", self.name), "ran".to_string());
            if self.halt_on_mail {
                Ok(Verdict::Halt(HaltReason::Transient {
                    message: "boom".to_string(),
                }))
            } else {
                Ok(Verdict::Continue)
            }
        }

        async fn terminate(&mut self, _: TerminateReason, _: &Meta) {
            self.seen.push("terminate");
        }
    }

    fn meta() -> Meta {
        Meta::new("192.0.2.1".parse().unwrap())
    }

    // the invoked set is always a prefix of the pipeline, ending at the
    // first halting stage
    #[tokio::test]
    async fn halt_stops_the_walk_at_a_prefix() {
        let mut stages: Vec<Box<dyn Stage>> = vec![
            Box::new(Probe::named("first")),
            Box::new(Probe {
                halt_on_mail: true,
                ..Probe::named("second")
            }),
            Box::new(Probe::named("third")),
        ];
        let mut meta = meta();

        let outcome = dispatch(&mut stages, &mut meta, &Event::Mail(None)).await;
        assert!(matches!(outcome, DispatchOutcome::Halt(_)));

        // meta written by the stages before (and including) the halting one
        // persists
        assert_eq!(meta.extra.len(), 2);

        let saw_mail = |i: usize| format!("{:?}", stages[i]).contains("mail");
        assert!(saw_mail(0));
        assert!(saw_mail(1));
        assert!(!saw_mail(2), "stages after the halt do not observe the event");
    }

    #[tokio::test]
    async fn full_walk_continues() {
        let mut stages: Vec<Box<dyn Stage>> =
            vec![Box::new(Probe::named("first")), Box::new(Probe::named("second"))];
        let mut meta = meta();

        assert_eq!(
            dispatch(&mut stages, &mut meta, &Event::Mail(None)).await,
            DispatchOutcome::Continue
        );
        assert_eq!(meta.extra.len(), 2);
    }

    #[tokio::test]
    async fn default_halt_reply_is_550() {
        let mut stages: Vec<Box<dyn Stage>> = vec![Box::new(Probe {
            halt_on_mail: true,
            ..Probe::default()
        })];
        let mut meta = meta();

        match dispatch(&mut stages, &mut meta, &Event::Mail(None)).await {
            DispatchOutcome::Halt(reply) => {
                assert_eq!(reply.code().value(), 550);
                assert!(reply.text().contains("Transient"));
            }
            DispatchOutcome::Continue => panic!("expected a halt"),
        }
    }

    #[tokio::test]
    async fn terminate_runs_for_every_stage() {
        let mut stages: Vec<Box<dyn Stage>> =
            vec![Box::new(Probe::default()), Box::new(Probe::default())];
        let meta = meta();

        terminate_all(&mut stages, TerminateReason::Normal, &meta).await;
        for stage in &stages {
            assert!(format!("{stage:?}").contains("terminate"));
        }
    }
}
