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
use feather_common::{CodeId, Meta, Reply, ReplyCode, Stage as ProtocolStage, TerminateReason};
use feather_config::{Config, TlsMode};
use feather_pipeline::{
    dispatch, terminate_all, DispatchOutcome, Event, PipelineSpec, SessionCtx, Stage,
};
use feather_protocol::{
    rustls, AcceptArgs, AuthArgs, AuthError, EhloArgs, Error, HeloArgs, MailFromArgs,
    ParseArgsError, RcptToArgs, ReceiverContext, ReceiverHandler,
};
use tokio_stream::StreamExt;

/// The per-connection session logic: walks the bound pipeline snapshot at
/// each protocol phase and computes every reply.
pub struct Handler {
    config: std::sync::Arc<Config>,
    rustls_config: Option<std::sync::Arc<rustls::ServerConfig>>,
    spec: std::sync::Arc<PipelineSpec>,
    store: std::sync::Arc<feather_store::TtlStore>,

    stages: Vec<Box<dyn Stage>>,
    meta: Meta,
    protocol_stage: ProtocolStage,
    session_count: i64,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("peer_ip", &self.meta.peer_ip)
            .field("stage", &self.protocol_stage)
            .field("stages", &self.stages.len())
            .finish()
    }
}

impl Handler {
    /// Create the session logic for one accepted connection.
    #[must_use]
    pub fn new(
        config: std::sync::Arc<Config>,
        rustls_config: Option<std::sync::Arc<rustls::ServerConfig>>,
        spec: std::sync::Arc<PipelineSpec>,
        store: std::sync::Arc<feather_store::TtlStore>,
        peer_ip: std::net::IpAddr,
        session_count: i64,
    ) -> Self {
        Self {
            config,
            rustls_config,
            spec,
            store,
            stages: vec![],
            meta: Meta::new(peer_ip),
            protocol_stage: ProtocolStage::Connect,
            session_count,
        }
    }

    /// The session's shared envelope metadata (tests and termination).
    #[must_use]
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// Mark the transport as already secured, for deployments behind an
    /// external TLS terminator (and for tests).
    #[must_use]
    pub fn with_tls_active(mut self) -> Self {
        self.meta.tls_active = true;
        self
    }

    fn reply_in_config(&self, code: CodeId) -> Reply {
        self.config.server.smtp.reply(code)
    }

    fn session_ctx(&self) -> SessionCtx {
        SessionCtx {
            peer_ip: self.meta.peer_ip,
            tls_active: self.meta.tls_active,
            server_domain: self.config.server.domain.clone(),
            max_message_size: self.config.server.session_options.max_message_size,
            store: self.store.clone(),
        }
    }

    fn auth_advertised(&self) -> bool {
        self.meta.tls_active || self.config.server.session_options.tls == TlsMode::Always
    }

    fn starttls_advertised(&self) -> bool {
        self.config.server.session_options.tls == TlsMode::IfAvailable && !self.meta.tls_active
    }

    /// The deterministic EHLO capability set.
    fn ehlo_reply(&self) -> Reply {
        let mut lines = vec![
            self.config.server.domain.clone(),
            format!(
                "SIZE {}",
                self.config.server.session_options.max_message_size
            ),
            "PIPELINING".to_string(),
            "8BITMIME".to_string(),
            "ENHANCEDSTATUSCODES".to_string(),
        ];

        if self.auth_advertised() {
            lines.push("AUTH PLAIN LOGIN".to_string());
        }
        if self.starttls_advertised() {
            lines.push("STARTTLS".to_string());
        }
        lines.extend(self.meta.extensions.iter().cloned());

        Reply::new(ReplyCode::Code { code: 250 }, lines.join("\r\n"))
    }

    /// End the transaction: the envelope is cleared, authentication and
    /// TLS state survive.
    fn reset_transaction(&mut self) {
        self.meta.reset_envelope();
        if self.protocol_stage > ProtocolStage::Helo {
            self.protocol_stage = ProtocolStage::Helo;
        }
    }
}

#[async_trait::async_trait]
impl ReceiverHandler for Handler {
    fn get_stage(&self) -> ProtocolStage {
        self.protocol_stage
    }

    async fn on_accept(&mut self, ctx: &mut ReceiverContext, args: AcceptArgs) -> Reply {
        tracing::debug!(client = %args.client_addr, kind = %args.kind, "New session.");

        // stage private state is created before the greeting is sent
        match self.spec.build(&self.session_ctx()) {
            Ok(stages) => self.stages = stages,
            Err(error) => {
                tracing::error!(%error, "Pipeline build failure, refusing the connection.");
                ctx.deny();
                return self.reply_in_config(CodeId::ConnectionMaxReached);
            }
        }

        // implicit TLS runs the handshake before the greeting
        if self.config.server.session_options.tls == TlsMode::Always && !self.meta.tls_active {
            if let Some(tls_config) = &self.rustls_config {
                ctx.upgrade_tls(
                    tls_config.clone(),
                    self.config.server.session_options.handshake_timeout,
                );
            } else {
                tracing::error!("tls = \"always\" but no usable TLS material.");
                ctx.deny();
                return self.reply_in_config(CodeId::ConnectionMaxReached);
            }
        }

        Reply::new(
            ReplyCode::Code { code: 220 },
            format!(
                "{} {} ready {}",
                self.config.server.domain, self.config.server.name, self.session_count
            ),
        )
    }

    async fn on_starttls(&mut self, ctx: &mut ReceiverContext) -> Reply {
        if self.meta.tls_active {
            return self.reply_in_config(CodeId::BadSequence);
        }

        match (&self.rustls_config, self.starttls_advertised()) {
            (Some(tls_config), true) => {
                ctx.upgrade_tls(
                    tls_config.clone(),
                    self.config.server.session_options.handshake_timeout,
                );
                self.reply_in_config(CodeId::TlsReady)
            }
            _ => self.reply_in_config(CodeId::TlsNotAvailable),
        }
    }

    async fn on_post_tls_handshake(&mut self, sni: Option<String>) -> Reply {
        tracing::debug!(?sni, "TLS established.");

        // capability state is discarded, the client re-issues EHLO
        self.meta.tls_active = true;
        self.meta.helo = None;
        self.meta.extensions.clear();
        self.meta.reset_envelope();
        self.protocol_stage = ProtocolStage::Connect;

        // only sent on tunneled connections
        Reply::new(
            ReplyCode::Code { code: 220 },
            format!(
                "{} {} ready {}",
                self.config.server.domain, self.config.server.name, self.session_count
            ),
        )
    }

    async fn on_helo(&mut self, _: &mut ReceiverContext, args: HeloArgs) -> Reply {
        self.meta.helo = Some(args.client_name.clone());
        self.reset_transaction();

        match dispatch(
            &mut self.stages,
            &mut self.meta,
            &Event::Helo(&args.client_name),
        )
        .await
        {
            DispatchOutcome::Continue => {
                self.protocol_stage = ProtocolStage::Helo;
                self.reply_in_config(CodeId::Helo)
            }
            DispatchOutcome::Halt(reply) => reply,
        }
    }

    async fn on_ehlo(&mut self, _: &mut ReceiverContext, args: EhloArgs) -> Reply {
        self.meta.helo = Some(args.client_name.clone());
        self.reset_transaction();

        match dispatch(
            &mut self.stages,
            &mut self.meta,
            &Event::Helo(&args.client_name),
        )
        .await
        {
            DispatchOutcome::Continue => {
                self.protocol_stage = ProtocolStage::Helo;
                self.ehlo_reply()
            }
            DispatchOutcome::Halt(reply) => reply,
        }
    }

    async fn on_auth(&mut self, ctx: &mut ReceiverContext, args: AuthArgs) -> Option<Reply> {
        if self.meta.authenticated {
            return Some(self.reply_in_config(CodeId::AlreadyAuthenticated));
        }
        if !self.auth_advertised() {
            return Some(self.reply_in_config(CodeId::AuthTlsRequired));
        }

        ctx.authenticate(args.mechanism, args.initial_response);
        None
    }

    async fn on_post_auth(
        &mut self,
        _: &mut ReceiverContext,
        result: Result<Credentials, AuthError>,
    ) -> Reply {
        let credentials = match result {
            Ok(credentials) => credentials,
            Err(error) => {
                tracing::debug!(%error, "SASL exchange failed.");
                return self.reply_in_config(CodeId::AuthError);
            }
        };

        match dispatch(
            &mut self.stages,
            &mut self.meta,
            &Event::Auth(&credentials),
        )
        .await
        {
            DispatchOutcome::Continue if self.meta.authenticated => {
                tracing::info!(user = ?self.meta.user, "Authentication succeeded.");
                self.reply_in_config(CodeId::AuthSucceeded)
            }
            // no stage vouched for the credentials
            DispatchOutcome::Continue => self.reply_in_config(CodeId::AuthInvalidCredentials),
            DispatchOutcome::Halt(reply) => reply,
        }
    }

    async fn on_mail_from(&mut self, _: &mut ReceiverContext, args: MailFromArgs) -> Reply {
        // built-in last line of defence: unauthenticated submission stops
        // here, before any stage sees the event
        if !self.meta.authenticated && self.meta.user.is_none() {
            return self.reply_in_config(CodeId::AuthRequired);
        }

        if let Some(declared) = args.size {
            if declared > self.config.server.session_options.max_message_size {
                return self.reply_in_config(CodeId::MessageSizeExceeded);
            }
        }

        self.meta.from = args.reverse_path.clone();

        match dispatch(
            &mut self.stages,
            &mut self.meta,
            &Event::Mail(args.reverse_path.as_ref()),
        )
        .await
        {
            DispatchOutcome::Continue => {
                self.protocol_stage = ProtocolStage::MailFrom;
                self.reply_in_config(CodeId::Ok)
            }
            DispatchOutcome::Halt(reply) => reply,
        }
    }

    async fn on_rcpt_to(&mut self, _: &mut ReceiverContext, args: RcptToArgs) -> Reply {
        match dispatch(
            &mut self.stages,
            &mut self.meta,
            &Event::Rcpt(&args.forward_path),
        )
        .await
        {
            DispatchOutcome::Continue => {
                // only accepted recipients enter the envelope
                self.meta.to.push(args.forward_path);
                self.protocol_stage = ProtocolStage::RcptTo;
                self.reply_in_config(CodeId::Ok)
            }
            DispatchOutcome::Halt(reply) => reply,
        }
    }

    async fn on_message(
        &mut self,
        _: &mut ReceiverContext,
        mut stream: impl tokio_stream::Stream<Item = Result<Vec<u8>, Error>> + Send + Unpin,
    ) -> Reply {
        let mut raw: Vec<u8> = vec![];
        let mut oversized = false;
        while let Some(item) = stream.next().await {
            match item {
                Ok(line) => raw.extend_from_slice(&line),
                Err(Error::BufferTooLong { expected, got }) => {
                    tracing::warn!(expected, got, "Message over the size limit, abandoning.");
                    // keep draining, the stream stops at the terminator
                    oversized = true;
                }
                Err(Error::Io(error)) => {
                    tracing::warn!(%error, "Connection trouble while reading the message.");
                    self.reset_transaction();
                    return self.reply_in_config(CodeId::InternalError);
                }
            }
        }

        if oversized {
            self.reset_transaction();
            return self.reply_in_config(CodeId::MessageSizeExceeded);
        }

        let outcome = dispatch(&mut self.stages, &mut self.meta, &Event::Data(&raw)).await;

        // the transaction is over either way; authentication and TLS
        // state survive
        self.reset_transaction();

        match outcome {
            DispatchOutcome::Continue => self.reply_in_config(CodeId::MessageAccepted),
            DispatchOutcome::Halt(reply) => reply,
        }
    }

    async fn on_rset(&mut self) -> Reply {
        self.reset_transaction();
        self.reply_in_config(CodeId::Reset)
    }

    async fn on_terminate(&mut self, reason: TerminateReason) {
        tracing::debug!(%reason, "Session terminated.");
        terminate_all(&mut self.stages, reason, &self.meta).await;
    }

    async fn on_hard_error(&mut self, ctx: &mut ReceiverContext, reply: Reply) -> Reply {
        ctx.deny();
        Reply::combine(&reply, &self.reply_in_config(CodeId::TooManyError))
    }

    async fn on_soft_error(&mut self, _: &mut ReceiverContext, reply: Reply) -> Reply {
        tokio::time::sleep(self.config.server.smtp.error.delay).await;
        reply
    }

    async fn on_data(&mut self) -> Reply {
        self.reply_in_config(CodeId::DataStart)
    }

    async fn on_data_without_rcpt(&mut self) -> Reply {
        self.reply_in_config(CodeId::NoRecipient)
    }

    async fn on_quit(&mut self) -> Reply {
        self.reply_in_config(CodeId::Closing)
    }

    async fn on_noop(&mut self) -> Reply {
        self.reply_in_config(CodeId::Ok)
    }

    async fn on_vrfy(&mut self) -> Reply {
        self.reply_in_config(CodeId::VrfyUnsupported)
    }

    async fn on_help(&mut self) -> Reply {
        self.reply_in_config(CodeId::Help)
    }

    async fn on_unknown(&mut self, buffer: Vec<u8>) -> Reply {
        tracing::debug!(buffer = ?std::str::from_utf8(&buffer), "Unknown command.");
        self.reply_in_config(CodeId::UnrecognizedCommand)
    }

    async fn on_bad_sequence(&mut self, _: (feather_protocol::Verb, ProtocolStage)) -> Reply {
        self.reply_in_config(CodeId::BadSequence)
    }

    async fn on_args_error(&mut self, error: ParseArgsError) -> Reply {
        match error {
            ParseArgsError::UnknownParameter(_) => {
                self.reply_in_config(CodeId::ParameterUnimplemented)
            }
            ParseArgsError::InvalidUtf8 | ParseArgsError::InvalidArgs => {
                self.reply_in_config(CodeId::SyntaxErrorParams)
            }
        }
    }
}
