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

use feather_common::{Address, Meta};

/// Delivery failure, split by whether the client should retry.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    /// Infrastructure trouble; surfaced as a `4xx` so the client retries.
    #[error("transient delivery failure: {0}")]
    Transient(String),
    /// The delivery can never succeed as addressed.
    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

/// A delivery backend. The routing stage hands it the rewritten message
/// and the recipient subset it routed; the call is synchronous within the
/// SMTP transaction.
#[async_trait::async_trait]
pub trait Transport: std::fmt::Debug + Send + Sync {
    /// Deliver `content` to `to`.
    async fn deliver(
        &self,
        meta: &Meta,
        to: &[Address],
        content: &[u8],
    ) -> Result<(), DeliveryError>;
}

/// Typed configuration of the delivery transports, the closed set of
/// `kind`s a route can name.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum DeliveryConfig {
    /// Write each message to `<dirpath>/<local part>/<ts>-<rand>.eml`.
    LocalFile {
        /// Root folder of the store.
        dirpath: std::path::PathBuf,
    },
    /// Forward over SMTP to a fixed relay.
    Forward {
        /// Relay host.
        host: String,
        /// Relay port.
        #[serde(default = "default_forward_port")]
        port: u16,
        /// Connection/response timeout.
        #[serde(with = "humantime_serde", default = "default_forward_timeout")]
        timeout: std::time::Duration,
    },
    /// Accept and discard; for tests and as a quarantine endpoint.
    Sink,
}

const fn default_forward_port() -> u16 {
    feather_common::SMTP_PORT
}

const fn default_forward_timeout() -> std::time::Duration {
    std::time::Duration::from_secs(5)
}

impl DeliveryConfig {
    /// Instantiate the transport this configuration describes.
    #[must_use]
    pub fn build(&self) -> std::sync::Arc<dyn Transport> {
        match self {
            Self::LocalFile { dirpath } => {
                std::sync::Arc::new(crate::LocalFile::new(dirpath.clone()))
            }
            Self::Forward {
                host,
                port,
                timeout,
            } => std::sync::Arc::new(crate::Forward::new(host.clone(), *port, *timeout)),
            Self::Sink => std::sync::Arc::new(SinkTransport),
        }
    }
}

/// Accepts everything, delivers nothing.
#[derive(Debug)]
pub(crate) struct SinkTransport;

#[async_trait::async_trait]
impl Transport for SinkTransport {
    async fn deliver(
        &self,
        _: &Meta,
        to: &[Address],
        content: &[u8],
    ) -> Result<(), DeliveryError> {
        tracing::debug!(recipients = to.len(), bytes = content.len(), "Message discarded.");
        Ok(())
    }
}
