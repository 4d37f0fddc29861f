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

/// Failure of the SASL exchange (RFC4954).
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The client aborted the exchange with `*`.
    #[error("authentication cancelled by the client")]
    Cancelled,
    /// A response was not valid base64.
    #[error("response is not base64")]
    Base64,
    /// The decoded response does not have the mechanism's shape.
    #[error("ill-formed sasl response")]
    InvalidMessage,
    /// The connection dropped mid-exchange.
    #[error("connection closed during the sasl exchange")]
    ConnectionClosed,
    /// IO failure mid-exchange.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Decode one client response line, handling the `*` cancellation.
pub(crate) fn decode_response(line: &[u8]) -> Result<Vec<u8>, AuthError> {
    let line = line.strip_suffix(b"\r\n").unwrap_or(line);
    if line == b"*" {
        return Err(AuthError::Cancelled);
    }
    base64::decode(line).map_err(|_| AuthError::Base64)
}

/// Split the single `authzid \0 authcid \0 passwd` message of AUTH PLAIN
/// (RFC4616). The authorization identity is ignored.
pub(crate) fn parse_plain(message: &[u8]) -> Result<Credentials, AuthError> {
    let mut fields = message.split(|&b| b == b'\0');

    let (_authzid, authcid, passwd) = (
        fields.next().ok_or(AuthError::InvalidMessage)?,
        fields.next().ok_or(AuthError::InvalidMessage)?,
        fields.next().ok_or(AuthError::InvalidMessage)?,
    );
    if fields.next().is_some() || authcid.is_empty() {
        return Err(AuthError::InvalidMessage);
    }

    Ok(Credentials {
        authid: String::from_utf8(authcid.to_vec()).map_err(|_| AuthError::InvalidMessage)?,
        authpass: String::from_utf8(passwd.to_vec()).map_err(|_| AuthError::InvalidMessage)?,
    })
}

/// `334` challenges of AUTH LOGIN: "Username:" / "Password:".
pub(crate) const LOGIN_CHALLENGE_USERNAME: &str = "334 VXNlcm5hbWU6\r\n";
pub(crate) const LOGIN_CHALLENGE_PASSWORD: &str = "334 UGFzc3dvcmQ6\r\n";

/// Empty challenge sent when AUTH PLAIN comes without an initial response.
pub(crate) const EMPTY_CHALLENGE: &str = "334 \r\n";

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn plain() {
        let credentials = parse_plain(b"\0alice\0secret").unwrap();
        assert_eq!(credentials.authid, "alice");
        assert_eq!(credentials.authpass, "secret");

        // with an authzid
        let credentials = parse_plain(b"ignored\0alice\0secret").unwrap();
        assert_eq!(credentials.authid, "alice");
    }

    #[rstest::rstest]
    #[case(b"no separators".as_slice())]
    #[case(b"\0\0".as_slice())]
    #[case(b"\0alice\0secret\0extra".as_slice())]
    fn plain_invalid(#[case] message: &[u8]) {
        assert!(matches!(
            parse_plain(message),
            Err(AuthError::InvalidMessage)
        ));
    }

    #[test]
    fn response_decoding() {
        assert_eq!(
            decode_response(b"AGFsaWNlAHNlY3JldA==\r\n").unwrap(),
            b"\0alice\0secret"
        );
        assert!(matches!(decode_response(b"*\r\n"), Err(AuthError::Cancelled)));
        assert!(matches!(decode_response(b"!!\r\n"), Err(AuthError::Base64)));
    }

    #[test]
    fn login_challenges_are_base64() {
        assert_eq!(base64::decode("VXNlcm5hbWU6").unwrap(), b"Username:");
        assert_eq!(base64::decode("UGFzc3dvcmQ6").unwrap(), b"Password:");
    }
}
