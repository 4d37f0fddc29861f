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

use crate::Reply;

/// Identifier of each reply the engine can produce on its own, resolved
/// through the configuration's code table (with the defaults below).
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    serde_with::DeserializeFromStr,
    serde_with::SerializeDisplay,
)]
pub enum CodeId {
    /// `HELO` accepted.
    Helo,
    /// Generic `250 Ok`.
    Ok,
    /// Authentication succeeded.
    AuthSucceeded,
    /// Authentication failed.
    AuthInvalidCredentials,
    /// The engine's MAIL FROM authentication wall.
    AuthRequired,
    /// AUTH received twice in the same session.
    AlreadyAuthenticated,
    /// The AUTH exchange was aborted or ill-formed.
    AuthError,
    /// The mechanism given with AUTH is not supported.
    AuthMechanismNotSupported,
    /// Plain-text AUTH refused without TLS.
    AuthTlsRequired,
    /// Start of the DATA phase.
    DataStart,
    /// End-of-data, message accepted.
    MessageAccepted,
    /// Message larger than `max_message_size`.
    MessageSizeExceeded,
    /// DATA before any accepted RCPT TO.
    NoRecipient,
    /// RSET accepted.
    Reset,
    /// VRFY is not supported.
    VrfyUnsupported,
    /// HELP text.
    Help,
    /// QUIT accepted.
    Closing,
    /// Ready to start the TLS handshake.
    TlsReady,
    /// STARTTLS received but not available.
    TlsNotAvailable,
    /// Command unrecognized.
    UnrecognizedCommand,
    /// Syntax error in arguments.
    SyntaxErrorParams,
    /// Unknown MAIL FROM / RCPT TO parameter extension.
    ParameterUnimplemented,
    /// Verb received at the wrong stage.
    BadSequence,
    /// Too many errors from the client, closing.
    TooManyError,
    /// Command line timeout.
    Timeout,
    /// A stage hook failed with an infrastructure error.
    InternalError,
    /// The server refuses to take this connection.
    ConnectionMaxReached,
}

impl CodeId {
    /// Default reply for this identifier, used when the configuration does
    /// not override it.
    #[must_use]
    pub fn default_reply(self) -> Reply {
        match self {
            Self::Helo => "250 Ok",
            Self::Ok => "250 Ok",
            Self::AuthSucceeded => "235 2.7.0 Authentication succeeded",
            Self::AuthInvalidCredentials => "535 Authentication failed",
            Self::AuthRequired => "530 5.7.0 Authentication required",
            Self::AlreadyAuthenticated => "503 5.5.1 Already authenticated",
            Self::AuthError => "501 5.5.2 Authentication aborted",
            Self::AuthMechanismNotSupported => "504 5.5.4 Mechanism is not supported",
            Self::AuthTlsRequired => "538 5.7.11 Encryption required for requested authentication mechanism",
            Self::DataStart => "354 Start mail input; end with <CRLF>.<CRLF>",
            Self::MessageAccepted => "250 2.0.0 OK: message accepted",
            Self::MessageSizeExceeded => "552 5.3.4 Message size exceeds fixed limit",
            Self::NoRecipient => "503 5.5.1 RCPT TO must be issued first",
            Self::Reset => "250 Ok",
            Self::VrfyUnsupported => "252 Not supported",
            Self::Help => "214 2.0.0 See https://feathermail.org/docs",
            Self::Closing => "221 Service closing transmission channel",
            Self::TlsReady => "220 Ready to start TLS",
            Self::TlsNotAvailable => "454 TLS not available",
            Self::UnrecognizedCommand => "500 5.5.2 Command unrecognized",
            Self::SyntaxErrorParams => "501 Syntax error in parameters or arguments",
            Self::ParameterUnimplemented => "555 5.5.4 Parameter not recognized",
            Self::BadSequence => "503 Bad sequence of commands",
            Self::TooManyError => "451 Too many errors from the client",
            Self::Timeout => "451 Timeout - closing connection",
            Self::InternalError => "451 4.3.0 Internal server error",
            Self::ConnectionMaxReached => "554 Cannot process connection, closing",
        }
        .parse()
        .expect("default replies are well formed")
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn all_defaults_parse() {
        for id in CodeId::iter() {
            let _reply = id.default_reply();
        }
    }

    #[test]
    fn folding() {
        assert_eq!(
            CodeId::MessageAccepted.default_reply().fold(),
            "250 2.0.0 OK: message accepted\r\n"
        );
        assert_eq!(
            CodeId::AuthRequired.default_reply().fold(),
            "530 5.7.0 Authentication required\r\n"
        );
    }
}
