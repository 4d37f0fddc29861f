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

use feather_common::{auth::Mechanism, Address, ClientName};

/// Buffer received from the client after the verb.
pub struct UnparsedArgs(pub Vec<u8>);

/// Information known when the TCP/IP connection is accepted.
pub struct AcceptArgs {
    /// Peer address of the connection.
    pub client_addr: std::net::SocketAddr,
    /// Address of the listener which accepted the connection.
    pub server_addr: std::net::SocketAddr,
    /// Kind of connection.
    pub kind: crate::ConnectionKind,
}

/// Argument of the HELO command.
pub struct HeloArgs {
    /// Name of the client.
    pub client_name: ClientName,
}

/// Argument of the EHLO command.
pub struct EhloArgs {
    /// Name of the client.
    pub client_name: ClientName,
}

/// Arguments of the MAIL FROM command.
pub struct MailFromArgs {
    /// Sender address, `None` for the null reverse path.
    pub reverse_path: Option<Address>,
    /// Declared message size (`SIZE=` parameter).
    pub size: Option<usize>,
}

/// Arguments of the RCPT TO command.
pub struct RcptToArgs {
    /// Recipient address.
    pub forward_path: Address,
}

/// Arguments of the AUTH command.
pub struct AuthArgs {
    /// Authentication mechanism.
    pub mechanism: Mechanism,
    /// Initial response, still base64 encoded.
    pub initial_response: Option<Vec<u8>>,
}

/// Error while parsing the arguments of a command.
#[derive(Debug, thiserror::Error)]
pub enum ParseArgsError {
    /// Non-UTF8 buffer.
    #[error("buffer is not valid utf8")]
    InvalidUtf8,
    /// The argument is not of the shape the verb requires.
    #[error("invalid arguments")]
    InvalidArgs,
    /// A `KEY=VALUE` parameter extension this server does not implement.
    #[error("unknown parameter extension '{0}'")]
    UnknownParameter(String),
}

// NOTE: from `[u8]::trim_ascii_start`, not stable in the toolchain baseline
const fn trim_ascii_start(slice: &[u8]) -> &[u8] {
    let mut bytes = slice;
    while let [first, rest @ ..] = bytes {
        if first.is_ascii_whitespace() {
            bytes = rest;
        } else {
            break;
        }
    }
    bytes
}

fn args_to_string(value: &UnparsedArgs) -> Result<String, ParseArgsError> {
    String::from_utf8(
        value
            .0
            .strip_suffix(b"\r\n")
            .ok_or(ParseArgsError::InvalidArgs)?
            .to_vec(),
    )
    .map_err(|_| ParseArgsError::InvalidUtf8)
}

impl TryFrom<UnparsedArgs> for HeloArgs {
    type Error = ParseArgsError;

    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        Ok(Self {
            client_name: args_to_string(&value)?
                .parse()
                .map_err(|_| ParseArgsError::InvalidArgs)?,
        })
    }
}

impl TryFrom<UnparsedArgs> for EhloArgs {
    type Error = ParseArgsError;

    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        Ok(Self {
            client_name: args_to_string(&value)?
                .parse()
                .map_err(|_| ParseArgsError::InvalidArgs)?,
        })
    }
}

/// Split `<path>` from trailing `KEY=VALUE` esmtp parameters.
fn parse_path(args: &str) -> Result<(&str, Vec<&str>), ParseArgsError> {
    let args = args.trim();
    if !args.starts_with('<') {
        return Err(ParseArgsError::InvalidArgs);
    }
    let end = args.find('>').ok_or(ParseArgsError::InvalidArgs)?;

    let path = &args[1..end];
    let params = args[end + 1..]
        .split_ascii_whitespace()
        .collect::<Vec<_>>();

    Ok((path, params))
}

impl TryFrom<UnparsedArgs> for MailFromArgs {
    type Error = ParseArgsError;

    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let value = args_to_string(&value)?;
        let (path, params) = parse_path(&value)?;

        let mut size = None;
        for param in params {
            let (key, val) = param.split_once('=').unwrap_or((param, ""));
            match key.to_ascii_uppercase().as_str() {
                "SIZE" => {
                    size = Some(val.parse().map_err(|_| ParseArgsError::InvalidArgs)?);
                }
                // advertised with 8BITMIME
                "BODY" if matches!(val.to_ascii_uppercase().as_str(), "7BIT" | "8BITMIME") => {}
                unknown => return Err(ParseArgsError::UnknownParameter(unknown.to_string())),
            }
        }

        Ok(Self {
            reverse_path: if path.is_empty() {
                None
            } else {
                Some(path.parse().map_err(|_| ParseArgsError::InvalidArgs)?)
            },
            size,
        })
    }
}

impl TryFrom<UnparsedArgs> for RcptToArgs {
    type Error = ParseArgsError;

    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let value = args_to_string(&value)?;
        let (path, params) = parse_path(&value)?;

        if let Some(param) = params.first() {
            let (key, _) = param.split_once('=').unwrap_or((*param, ""));
            return Err(ParseArgsError::UnknownParameter(key.to_string()));
        }

        Ok(Self {
            forward_path: path.parse().map_err(|_| ParseArgsError::InvalidArgs)?,
        })
    }
}

impl TryFrom<UnparsedArgs> for AuthArgs {
    type Error = ParseArgsError;

    fn try_from(value: UnparsedArgs) -> Result<Self, Self::Error> {
        let value = value
            .0
            .strip_suffix(b"\r\n")
            .ok_or(ParseArgsError::InvalidArgs)?;
        let value = trim_ascii_start(value);

        let (mechanism, initial_response) = value.iter().position(u8::is_ascii_whitespace).map_or(
            (value.to_vec(), None),
            |space| {
                let (mechanism, rest) = value.split_at(space);
                (mechanism.to_vec(), Some(rest[1..].to_vec()))
            },
        );

        Ok(Self {
            mechanism: String::from_utf8(mechanism)
                .map_err(|_| ParseArgsError::InvalidUtf8)?
                .parse()
                .map_err(|_| ParseArgsError::InvalidArgs)?,
            initial_response,
        })
    }
}

/// SMTP verb.
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::AsRefStr, strum::EnumString, strum::EnumVariantNames)]
pub enum Verb {
    /// Identify the SMTP client to the SMTP server. (historical)
    #[strum(serialize = "HELO ")]
    Helo,
    /// Identify the SMTP client and request the SMTP extensions.
    #[strum(serialize = "EHLO ")]
    Ehlo,
    /// Initiate a mail transaction.
    #[strum(serialize = "MAIL FROM:")]
    MailFrom,
    /// Add one recipient to the transaction.
    #[strum(serialize = "RCPT TO:")]
    RcptTo,
    /// Start the transfer of the message body.
    #[strum(serialize = "DATA\r\n")]
    Data,
    /// Close the transmission channel.
    #[strum(serialize = "QUIT\r\n")]
    Quit,
    /// Abort the current mail transaction.
    #[strum(serialize = "RSET\r\n")]
    Rset,
    /// Ask the server for helpful information.
    #[strum(serialize = "HELP")]
    Help,
    /// No operation.
    #[strum(serialize = "NOOP\r\n")]
    Noop,
    /// Ask for the mailbox of a user, always answered with 252.
    #[strum(serialize = "VRFY")]
    Vrfy,
    /// Upgrade to TLS.
    /// <https://datatracker.ietf.org/doc/html/rfc3207>
    #[strum(serialize = "STARTTLS\r\n")]
    StartTls,
    /// SASL authentication.
    /// <https://datatracker.ietf.org/doc/html/rfc4954>
    #[strum(serialize = "AUTH ")]
    Auth,
    /// Any other buffer received while expecting a command.
    Unknown,
}

impl Verb {
    /// Match the start of `line` against the verb table.
    #[must_use]
    pub fn from_line(line: &[u8]) -> (Self, UnparsedArgs) {
        <Self as strum::VariantNames>::VARIANTS
            .iter()
            .find(|i| line.len() >= i.len() && line[..i.len()].eq_ignore_ascii_case(i.as_bytes()))
            .map_or_else(
                || (Self::Unknown, UnparsedArgs(line.to_vec())),
                |verb| {
                    (
                        verb.parse().expect("verb found in the table above"),
                        UnparsedArgs(line[verb.len()..].to_vec()),
                    )
                },
            )
    }
}
