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

use crate::auth_exchange::{
    decode_response, parse_plain, AuthError, EMPTY_CHALLENGE, LOGIN_CHALLENGE_PASSWORD,
    LOGIN_CHALLENGE_USERNAME,
};
use crate::command::{AcceptArgs, AuthArgs, EhloArgs, HeloArgs, MailFromArgs, RcptToArgs};
use crate::sink::Sink;
use crate::stream::Stream;
use crate::{ConnectionKind, ParseArgsError, ReceiverHandler, Verb};
use feather_common::auth::{Credentials, Mechanism};
use feather_common::{Stage, TerminateReason};
use tokio_rustls::rustls;

/// A command line longer than this is refused before parsing.
const COMMAND_LINE_MAX: usize = 512;

enum HandshakeOutcome {
    Message,
    UpgradeTls {
        config: std::sync::Arc<rustls::ServerConfig>,
        handshake_timeout: std::time::Duration,
    },
    Authenticate {
        mechanism: Mechanism,
        initial_response: Option<Vec<u8>>,
    },
    Quit,
}

enum LoopExit {
    Quit(TerminateReason),
    UpgradeTls {
        config: std::sync::Arc<rustls::ServerConfig>,
        handshake_timeout: std::time::Duration,
    },
}

/// Counts error replies; thresholds escalate through the handler's
/// soft/hard error hooks. `-1` disables a threshold.
pub struct ErrorCounter {
    /// Error replies produced so far.
    pub error_count: i64,
    /// Threshold of the soft hook (delaying).
    pub threshold_soft_error: i64,
    /// Threshold of the hard hook (closing).
    pub threshold_hard_error: i64,
}

/// Handle for the [`ReceiverHandler`] to steer the [`Receiver`].
#[derive(Default)]
pub struct ReceiverContext {
    outcome: Option<HandshakeOutcome>,
}

impl ReceiverContext {
    /// Make the receiver close the connection after the pending reply.
    pub fn deny(&mut self) {
        self.outcome = Some(HandshakeOutcome::Quit);
    }

    /// Make the receiver run a TLS handshake after the pending reply.
    pub fn upgrade_tls(
        &mut self,
        config: std::sync::Arc<rustls::ServerConfig>,
        handshake_timeout: std::time::Duration,
    ) {
        self.outcome = Some(HandshakeOutcome::UpgradeTls {
            config,
            handshake_timeout,
        });
    }

    /// Make the receiver run the SASL exchange.
    pub fn authenticate(&mut self, mechanism: Mechanism, initial_response: Option<Vec<u8>>) {
        self.outcome = Some(HandshakeOutcome::Authenticate {
            mechanism,
            initial_response,
        });
    }
}

/// An SMTP receiver: owns the wire and drives a [`ReceiverHandler`].
pub struct Receiver<
    T: ReceiverHandler + Send,
    W: tokio::io::AsyncWrite + Unpin + Send,
    R: tokio::io::AsyncRead + Unpin + Send,
> {
    pub(crate) handler: T,
    pub(crate) sink: Sink<W>,
    pub(crate) stream: Stream<R>,
    error_counter: ErrorCounter,
    context: ReceiverContext,
    kind: ConnectionKind,
    message_size_max: usize,
    command_timeout: std::time::Duration,
}

impl<T: ReceiverHandler + Send>
    Receiver<T, tokio::net::tcp::OwnedWriteHalf, tokio::net::tcp::OwnedReadHalf>
{
    /// Create a receiver over a freshly accepted TCP stream.
    pub fn new(
        tcp_stream: tokio::net::TcpStream,
        kind: ConnectionKind,
        handler: T,
        threshold_soft_error: i64,
        threshold_hard_error: i64,
        message_size_max: usize,
        command_timeout: std::time::Duration,
    ) -> Self {
        let (read, write) = tcp_stream.into_split();
        Self::from_parts(
            read,
            write,
            kind,
            handler,
            threshold_soft_error,
            threshold_hard_error,
            message_size_max,
            command_timeout,
        )
    }

    /// Run the whole session; gives the handler back along with how the
    /// session ended, so the caller can run the termination hooks.
    pub async fn receive(
        mut self,
        client_addr: std::net::SocketAddr,
        server_addr: std::net::SocketAddr,
    ) -> (T, std::io::Result<TerminateReason>) {
        let greeting = self
            .handler
            .on_accept(
                &mut self.context,
                AcceptArgs {
                    client_addr,
                    server_addr,
                    kind: self.kind,
                },
            )
            .await;

        match std::mem::take(&mut self.context).outcome {
            // implicit TLS: handshake first, the greeting is produced by
            // `on_post_tls_handshake`
            Some(HandshakeOutcome::UpgradeTls {
                config,
                handshake_timeout,
            }) => return self.upgrade_tls(config, handshake_timeout).await,
            Some(HandshakeOutcome::Quit) => {
                let denied = self.sink.write_all(&greeting.fold()).await;
                return (self.handler, denied.map(|()| TerminateReason::Normal));
            }
            _ => {}
        }

        if let Err(error) = self.sink.write_all(&greeting.fold()).await {
            return (self.handler, Err(error));
        }

        let exit = self.run_loop().await;
        match exit {
            Ok(LoopExit::Quit(reason)) => (self.handler, Ok(reason)),
            Ok(LoopExit::UpgradeTls {
                config,
                handshake_timeout,
            }) => self.upgrade_tls(config, handshake_timeout).await,
            Err(error) => (self.handler, Err(error)),
        }
    }

    async fn upgrade_tls(
        self,
        config: std::sync::Arc<rustls::ServerConfig>,
        handshake_timeout: std::time::Duration,
    ) -> (T, std::io::Result<TerminateReason>) {
        let Self {
            mut handler,
            sink,
            stream,
            error_counter,
            kind,
            message_size_max,
            command_timeout,
            ..
        } = self;

        let tcp_stream = sink
            .inner
            .reunite(stream.inner)
            .expect("the stream/sink pair comes from the same socket");

        let acceptor = tokio_rustls::TlsAcceptor::from(config);
        let tls_tcp_stream = match tokio::time::timeout(
            handshake_timeout,
            acceptor.accept(tcp_stream),
        )
        .await
        {
            Ok(Ok(tls_tcp_stream)) => tls_tcp_stream,
            Ok(Err(error)) => {
                tracing::warn!(%error, "TLS handshake failure.");
                return (handler, Err(error));
            }
            Err(elapsed) => {
                tracing::warn!(%elapsed, "TLS handshake timed out.");
                return (handler, Err(std::io::Error::from(elapsed)));
            }
        };

        let sni = tls_tcp_stream
            .get_ref()
            .1
            .sni_hostname()
            .map(str::to_string);

        // see https://github.com/tokio-rs/tls/issues/40
        let (read, write) = tokio::io::split(tls_tcp_stream);

        let greeting = handler.on_post_tls_handshake(sni).await;

        let mut secured = Receiver {
            handler,
            sink: Sink::new(write),
            stream: Stream::new(read),
            error_counter,
            context: ReceiverContext::default(),
            kind,
            message_size_max,
            command_timeout,
        };

        // with STARTTLS the client re-issues EHLO on its own; tunneled
        // connections expect the greeting now
        if kind == ConnectionKind::Tunneled {
            if let Err(error) = secured.sink.write_all(&greeting.fold()).await {
                return (secured.handler, Err(error));
            }
        }

        let exit = secured.run_loop().await;
        match exit {
            Ok(LoopExit::Quit(reason)) => (secured.handler, Ok(reason)),
            Ok(LoopExit::UpgradeTls { .. }) => {
                tracing::error!("TLS upgrade requested over an established TLS session.");
                (secured.handler, Ok(TerminateReason::ProtocolError))
            }
            Err(error) => (secured.handler, Err(error)),
        }
    }
}

impl<
        T: ReceiverHandler + Send,
        W: tokio::io::AsyncWrite + Unpin + Send,
        R: tokio::io::AsyncRead + Unpin + Send,
    > Receiver<T, W, R>
{
    /// Create a receiver over an already split pair, without TLS upgrade
    /// support. Used for secured halves and by tests.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        read: R,
        write: W,
        kind: ConnectionKind,
        handler: T,
        threshold_soft_error: i64,
        threshold_hard_error: i64,
        message_size_max: usize,
        command_timeout: std::time::Duration,
    ) -> Self {
        Self {
            handler,
            sink: Sink::new(write),
            stream: Stream::new(read),
            error_counter: ErrorCounter {
                error_count: 0,
                threshold_soft_error,
                threshold_hard_error,
            },
            context: ReceiverContext::default(),
            kind,
            message_size_max,
            command_timeout,
        }
    }

    /// Run a session over the split pair. STARTTLS acceptance from the
    /// handler is a programming error here and closes the connection.
    pub async fn receive_parts(
        mut self,
        client_addr: std::net::SocketAddr,
        server_addr: std::net::SocketAddr,
    ) -> (T, std::io::Result<TerminateReason>) {
        let greeting = self
            .handler
            .on_accept(
                &mut self.context,
                AcceptArgs {
                    client_addr,
                    server_addr,
                    kind: self.kind,
                },
            )
            .await;

        if let Some(HandshakeOutcome::Quit) = std::mem::take(&mut self.context).outcome {
            let denied = self.sink.write_all(&greeting.fold()).await;
            return (self.handler, denied.map(|()| TerminateReason::Normal));
        }

        if let Err(error) = self.sink.write_all(&greeting.fold()).await {
            return (self.handler, Err(error));
        }

        match self.run_loop().await {
            Ok(LoopExit::Quit(reason)) => (self.handler, Ok(reason)),
            Ok(LoopExit::UpgradeTls { .. }) => {
                tracing::error!("TLS upgrade is not supported on this transport.");
                (self.handler, Ok(TerminateReason::ProtocolError))
            }
            Err(error) => (self.handler, Err(error)),
        }
    }

    /// The command pump.
    async fn run_loop(&mut self) -> std::io::Result<LoopExit> {
        macro_rules! handle_args {
            ($args_output:ty, $args:expr, $on_event:tt) => {
                match <$args_output>::try_from($args) {
                    Ok(args) => self.handler.$on_event(&mut self.context, args).await,
                    Err(e) => self.handler.on_args_error(e).await,
                }
            };
            ($args_output:ty, $args:expr, Option: $on_event:tt) => {
                match <$args_output>::try_from($args) {
                    Ok(args) => self.handler.$on_event(&mut self.context, args).await,
                    Err(e) => Some(self.handler.on_args_error(e).await),
                }
            };
        }

        loop {
            let line = match tokio::time::timeout(self.command_timeout, self.stream.next_line())
                .await
            {
                Err(elapsed) => {
                    // no reply on idle timeout, the client only observes the
                    // closed socket
                    tracing::warn!(%elapsed, "Closing idle connection.");
                    return Ok(LoopExit::Quit(TerminateReason::ClientDisconnect));
                }
                Ok(Ok(Some(line))) => line,
                Ok(Ok(None)) => return Ok(LoopExit::Quit(TerminateReason::ClientDisconnect)),
                Ok(Err(error)) => return Err(error),
            };

            if line.len() >= COMMAND_LINE_MAX {
                let reply = self.handler.on_args_error(ParseArgsError::InvalidArgs).await;
                self.sink
                    .send_reply(
                        &mut self.context,
                        &mut self.error_counter,
                        &mut self.handler,
                        reply,
                    )
                    .await?;
                continue;
            }

            let (verb, args) = Verb::from_line(&line);
            tracing::trace!("<< {:?} ; {:?}", verb, std::str::from_utf8(&args.0));

            let stage = self.handler.get_stage();
            let reply = match (verb, stage) {
                (Verb::Helo, _) => Some(handle_args!(HeloArgs, args, on_helo)),
                (Verb::Ehlo, _) => Some(handle_args!(EhloArgs, args, on_ehlo)),
                (Verb::Noop, _) => Some(self.handler.on_noop().await),
                (Verb::Help, _) => Some(self.handler.on_help().await),
                (Verb::Vrfy, _) => Some(self.handler.on_vrfy().await),
                (Verb::Rset, _) => Some(self.handler.on_rset().await),
                (Verb::StartTls, Stage::Connect | Stage::Helo) => {
                    Some(self.handler.on_starttls(&mut self.context).await)
                }
                (Verb::Auth, Stage::Connect | Stage::Helo) => {
                    handle_args!(AuthArgs, args, Option: on_auth)
                }
                (Verb::MailFrom, Stage::Helo) => {
                    Some(handle_args!(MailFromArgs, args, on_mail_from))
                }
                (Verb::RcptTo, Stage::MailFrom | Stage::RcptTo) => {
                    Some(handle_args!(RcptToArgs, args, on_rcpt_to))
                }
                (Verb::Data, Stage::RcptTo) => {
                    self.context.outcome = Some(HandshakeOutcome::Message);
                    Some(self.handler.on_data().await)
                }
                (Verb::Data, Stage::MailFrom) => {
                    Some(self.handler.on_data_without_rcpt().await)
                }
                (Verb::Quit, _) => {
                    self.context.outcome = Some(HandshakeOutcome::Quit);
                    Some(self.handler.on_quit().await)
                }
                (Verb::Unknown, _) => Some(self.handler.on_unknown(args.0).await),
                otherwise => Some(self.handler.on_bad_sequence(otherwise).await),
            };

            if let Some(reply) = reply {
                self.sink
                    .send_reply(
                        &mut self.context,
                        &mut self.error_counter,
                        &mut self.handler,
                        reply,
                    )
                    .await?;
            }

            match std::mem::take(&mut self.context).outcome {
                None => {}
                Some(HandshakeOutcome::Quit) => {
                    return Ok(LoopExit::Quit(if matches!(verb, Verb::Quit) {
                        TerminateReason::Normal
                    } else {
                        TerminateReason::ProtocolError
                    }))
                }
                Some(HandshakeOutcome::UpgradeTls {
                    config,
                    handshake_timeout,
                }) => {
                    return Ok(LoopExit::UpgradeTls {
                        config,
                        handshake_timeout,
                    })
                }
                Some(HandshakeOutcome::Message) => {
                    let reply = {
                        let message_stream = self.stream.as_message_stream(self.message_size_max);
                        tokio::pin!(message_stream);
                        self.handler
                            .on_message(&mut self.context, message_stream)
                            .await
                    };
                    self.sink
                        .send_reply(
                            &mut self.context,
                            &mut self.error_counter,
                            &mut self.handler,
                            reply,
                        )
                        .await?;

                    if let Some(HandshakeOutcome::Quit) =
                        std::mem::take(&mut self.context).outcome
                    {
                        return Ok(LoopExit::Quit(TerminateReason::ProtocolError));
                    }
                }
                Some(HandshakeOutcome::Authenticate {
                    mechanism,
                    initial_response,
                }) => {
                    let result = self.authenticate(mechanism, initial_response).await?;

                    let reply = self.handler.on_post_auth(&mut self.context, result).await;
                    self.sink
                        .send_reply(
                            &mut self.context,
                            &mut self.error_counter,
                            &mut self.handler,
                            reply,
                        )
                        .await?;

                    if let Some(HandshakeOutcome::Quit) =
                        std::mem::take(&mut self.context).outcome
                    {
                        return Ok(LoopExit::Quit(TerminateReason::ProtocolError));
                    }
                }
            }
        }
    }

    /// Send one `334` challenge and read the client's response.
    async fn challenge_response(
        &mut self,
        challenge: &str,
    ) -> std::io::Result<Result<Vec<u8>, AuthError>> {
        self.sink.write_all(challenge).await?;
        match self.stream.next_line().await? {
            Some(line) => Ok(decode_response(&line)),
            None => Ok(Err(AuthError::ConnectionClosed)),
        }
    }

    /// The server side of the PLAIN and LOGIN exchanges (RFC4954).
    async fn authenticate(
        &mut self,
        mechanism: Mechanism,
        initial_response: Option<Vec<u8>>,
    ) -> std::io::Result<Result<Credentials, AuthError>> {
        match mechanism {
            Mechanism::Plain => {
                let message = match initial_response {
                    Some(response) => decode_response(&response),
                    None => self.challenge_response(EMPTY_CHALLENGE).await?,
                };
                Ok(message.and_then(|message| parse_plain(&message)))
            }
            Mechanism::Login => {
                let username = match initial_response {
                    Some(response) => decode_response(&response),
                    None => self.challenge_response(LOGIN_CHALLENGE_USERNAME).await?,
                };
                let username = match username {
                    Ok(username) => username,
                    Err(error) => return Ok(Err(error)),
                };

                let password = match self.challenge_response(LOGIN_CHALLENGE_PASSWORD).await? {
                    Ok(password) => password,
                    Err(error) => return Ok(Err(error)),
                };

                match (String::from_utf8(username), String::from_utf8(password)) {
                    (Ok(authid), Ok(authpass)) => Ok(Ok(Credentials { authid, authpass })),
                    _ => Ok(Err(AuthError::InvalidMessage)),
                }
            }
        }
    }
}
