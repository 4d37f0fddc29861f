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

use crate::{Address, ClientName};

/// The shared envelope metadata, flowing through every pipeline stage of a
/// session.
///
/// Canonical keys are typed fields; stages communicate anything else
/// through [`Meta::extra`], namespacing their keys by stage id
/// (`"<stage>.<key>"`). Unknown keys pass through untouched.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Meta {
    /// Peer address, always present, set at session start.
    pub peer_ip: std::net::IpAddr,
    /// Client name from HELO/EHLO.
    pub helo: Option<ClientName>,
    /// Mirror of the session TLS flag, updated after STARTTLS.
    pub tls_active: bool,
    /// Has an authentication stage validated the client ?
    pub authenticated: bool,
    /// Authenticated identity.
    pub user: Option<String>,
    /// Envelope sender; `None` for the null reverse path (`MAIL FROM:<>`).
    pub from: Option<Address>,
    /// Envelope recipients, in order of acceptance.
    pub to: Vec<Address>,
    /// Routing tag set by a transformer, consumed by delivery.
    pub mailbox: Option<String>,
    /// Extra EHLO capability lines contributed by stages.
    pub extensions: Vec<String>,
    /// Stage-private keys, namespaced by stage id.
    pub extra: std::collections::BTreeMap<String, String>,
}

impl Meta {
    /// Create the session metadata, before the greeting is sent.
    #[must_use]
    pub fn new(peer_ip: std::net::IpAddr) -> Self {
        Self {
            peer_ip,
            helo: None,
            tls_active: false,
            authenticated: false,
            user: None,
            from: None,
            to: vec![],
            mailbox: None,
            extensions: vec![],
            extra: std::collections::BTreeMap::default(),
        }
    }

    /// Clear the envelope on RSET or at the end of a transaction.
    /// Authentication and TLS state survive.
    pub fn reset_envelope(&mut self) {
        self.from = None;
        self.to.clear();
        self.mailbox = None;
    }

    /// `authenticated == true` implies a non-empty user, or the explicit
    /// trusted placeholder.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.authenticated || self.user.is_some()
    }
}

/// Why a session terminated; given to every stage's `terminate` hook.
#[derive(Debug, Copy, Clone, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum TerminateReason {
    /// Client sent QUIT.
    Normal,
    /// The socket closed without QUIT.
    ClientDisconnect,
    /// The client broke the protocol beyond recovery.
    ProtocolError,
    /// Internal failure.
    Fatal,
}

#[cfg(test)]
mod tests {

    use super::*;
    use crate::addr;

    #[test]
    fn reset_keeps_identity() {
        let mut meta = Meta::new("192.0.2.1".parse().unwrap());
        meta.authenticated = true;
        meta.user = Some("alice".to_string());
        meta.tls_active = true;
        meta.from = Some(addr!("alice@example.com"));
        meta.to.push(addr!("bob@example.com"));
        meta.mailbox = Some("inbox".to_string());

        meta.reset_envelope();

        assert!(meta.from.is_none());
        assert!(meta.to.is_empty());
        assert!(meta.mailbox.is_none());
        assert!(meta.authenticated);
        assert!(meta.tls_active);
        assert_eq!(meta.user.as_deref(), Some("alice"));
    }
}
