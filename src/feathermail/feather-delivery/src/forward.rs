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

use crate::{DeliveryError, Transport};
use feather_common::{Address, Meta};

/// Relays the message over SMTP to a fixed next hop.
#[derive(Debug)]
pub struct Forward {
    host: String,
    port: u16,
    timeout: std::time::Duration,
}

impl Forward {
    ///
    #[must_use]
    pub fn new(host: String, port: u16, timeout: std::time::Duration) -> Self {
        Self {
            host,
            port,
            timeout,
        }
    }

    fn envelope(meta: &Meta, to: &[Address]) -> Result<lettre::address::Envelope, DeliveryError> {
        let from = meta
            .from
            .as_ref()
            .map(|from| from.full().parse())
            .transpose()
            .map_err(|error: lettre::address::AddressError| {
                DeliveryError::Permanent(error.to_string())
            })?;

        let to = to
            .iter()
            .map(|rcpt| rcpt.full().parse())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|error: lettre::address::AddressError| {
                DeliveryError::Permanent(error.to_string())
            })?;

        lettre::address::Envelope::new(from, to)
            .map_err(|error| DeliveryError::Permanent(error.to_string()))
    }
}

#[async_trait::async_trait]
impl Transport for Forward {
    #[tracing::instrument(name = "forward", skip_all, fields(host = %self.host))]
    async fn deliver(
        &self,
        meta: &Meta,
        to: &[Address],
        content: &[u8],
    ) -> Result<(), DeliveryError> {
        let envelope = Self::envelope(meta, to)?;

        let mailer = lettre::AsyncSmtpTransport::<lettre::Tokio1Executor>::builder_dangerous(
            self.host.clone(),
        )
        .port(self.port)
        .timeout(Some(self.timeout))
        .build();

        match lettre::AsyncTransport::send_raw(&mailer, &envelope, content).await {
            Ok(_) => {
                tracing::info!(recipients = to.len(), "Email forwarded.");
                Ok(())
            }
            Err(error) if error.is_permanent() => {
                Err(DeliveryError::Permanent(error.to_string()))
            }
            Err(error) => Err(DeliveryError::Transient(error.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use feather_common::addr;

    #[test]
    fn envelope_with_null_sender() {
        let meta = Meta::new("192.0.2.1".parse().unwrap());
        let envelope = Forward::envelope(&meta, &[addr!("bob@elsewhere.com")]).unwrap();
        assert!(envelope.from().is_none());
    }

    #[tokio::test]
    async fn unreachable_relay_is_transient() {
        let transport = Forward::new(
            "127.0.0.1".to_string(),
            9, // discard port, nothing listens
            std::time::Duration::from_millis(200),
        );

        let mut meta = Meta::new("192.0.2.1".parse().unwrap());
        meta.from = Some(addr!("alice@example.com"));

        let result = transport
            .deliver(&meta, &[addr!("bob@elsewhere.com")], b"hi\r\n")
            .await;
        assert!(matches!(result, Err(DeliveryError::Transient(_))));
    }
}
