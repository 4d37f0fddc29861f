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

use crate::auth_exchange::AuthError;
use crate::receiver::ReceiverContext;
use crate::stream::Error;
use crate::{AcceptArgs, AuthArgs, EhloArgs, HeloArgs, MailFromArgs, ParseArgsError, RcptToArgs};
use feather_common::auth::Credentials;
use feather_common::{CodeId, Reply, Stage, TerminateReason};

/// Implemented by the session logic driven by a [`Receiver`](crate::Receiver).
///
/// The receiver owns the wire; the handler owns the semantics. Most hooks
/// return the [`Reply`] to send back. Hooks with a default body behave per
/// RFC and rarely need overriding.
#[async_trait::async_trait]
pub trait ReceiverHandler {
    /// The receiver does not track the transaction, it asks the handler
    /// after each command for the stage used to gate verbs.
    fn get_stage(&self) -> Stage;

    /// Called when the client connects, before any command.
    async fn on_accept(&mut self, ctx: &mut ReceiverContext, args: AcceptArgs) -> Reply;

    /// Called after receiving STARTTLS.
    async fn on_starttls(&mut self, ctx: &mut ReceiverContext) -> Reply;

    /// Called after a successful TLS handshake.
    async fn on_post_tls_handshake(&mut self, sni: Option<String>) -> Reply;

    /// Called after receiving AUTH. Returning `None` lets the receiver run
    /// the SASL exchange configured through
    /// [`ReceiverContext::authenticate`].
    async fn on_auth(&mut self, ctx: &mut ReceiverContext, args: AuthArgs) -> Option<Reply>;

    /// Called once the SASL exchange finished.
    async fn on_post_auth(
        &mut self,
        ctx: &mut ReceiverContext,
        result: Result<Credentials, AuthError>,
    ) -> Reply;

    /// Called after receiving HELO.
    async fn on_helo(&mut self, ctx: &mut ReceiverContext, args: HeloArgs) -> Reply;

    /// Called after receiving EHLO.
    async fn on_ehlo(&mut self, ctx: &mut ReceiverContext, args: EhloArgs) -> Reply;

    /// Called after receiving MAIL FROM.
    async fn on_mail_from(&mut self, ctx: &mut ReceiverContext, args: MailFromArgs) -> Reply;

    /// Called after receiving RCPT TO.
    async fn on_rcpt_to(&mut self, ctx: &mut ReceiverContext, args: RcptToArgs) -> Reply;

    /// Called after the DATA command was accepted; the stream yields the
    /// message body with dot-stuffing already handled and ends at the
    /// `.<CRLF>` terminator.
    async fn on_message(
        &mut self,
        ctx: &mut ReceiverContext,
        stream: impl tokio_stream::Stream<Item = Result<Vec<u8>, Error>> + Send + Unpin,
    ) -> Reply;

    /// Called after receiving RSET.
    async fn on_rset(&mut self) -> Reply;

    /// Called when the session ends, with the reason; stages get their
    /// `terminate` hook here.
    async fn on_terminate(&mut self, reason: TerminateReason);

    /// Called when the error count reaches the hard threshold.
    async fn on_hard_error(&mut self, ctx: &mut ReceiverContext, reply: Reply) -> Reply {
        ctx.deny();
        Reply::combine(&reply, &CodeId::TooManyError.default_reply())
    }

    /// Called when the error count reaches the soft threshold.
    async fn on_soft_error(&mut self, _: &mut ReceiverContext, reply: Reply) -> Reply {
        reply
    }

    /// Called after receiving DATA, before the body is read.
    async fn on_data(&mut self) -> Reply {
        CodeId::DataStart.default_reply()
    }

    /// Called when DATA arrives before any accepted recipient.
    async fn on_data_without_rcpt(&mut self) -> Reply {
        CodeId::NoRecipient.default_reply()
    }

    /// Called after receiving QUIT.
    async fn on_quit(&mut self) -> Reply {
        CodeId::Closing.default_reply()
    }

    /// Called after receiving NOOP.
    async fn on_noop(&mut self) -> Reply {
        CodeId::Ok.default_reply()
    }

    /// Called after receiving VRFY; always unsupported.
    async fn on_vrfy(&mut self) -> Reply {
        CodeId::VrfyUnsupported.default_reply()
    }

    /// Called after receiving HELP.
    async fn on_help(&mut self) -> Reply {
        CodeId::Help.default_reply()
    }

    /// Called after receiving an unrecognized command.
    async fn on_unknown(&mut self, buffer: Vec<u8>) -> Reply {
        tracing::debug!(buffer = ?std::str::from_utf8(&buffer), "Unknown command.");
        CodeId::UnrecognizedCommand.default_reply()
    }

    /// Called when the verb is not legal at the current stage.
    async fn on_bad_sequence(&mut self, _: (crate::Verb, Stage)) -> Reply {
        CodeId::BadSequence.default_reply()
    }

    /// Called when an argument of a command is invalid.
    async fn on_args_error(&mut self, error: ParseArgsError) -> Reply {
        match error {
            ParseArgsError::UnknownParameter(_) => CodeId::ParameterUnimplemented.default_reply(),
            ParseArgsError::InvalidUtf8 | ParseArgsError::InvalidArgs => {
                CodeId::SyntaxErrorParams.default_reply()
            }
        }
    }
}
