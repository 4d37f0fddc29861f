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

use crate::config::field::FieldSessionOptions;

struct TlsLogger;
impl rustls::KeyLog for TlsLogger {
    fn log(&self, label: &str, client_random: &[u8], secret: &[u8]) {
        tracing::trace!(label, ?client_random, ?secret);
    }
}

/// Build the incoming-side TLS configuration from the session options.
///
/// # Errors
///
/// * `certfile` or `keyfile` is missing from the configuration
/// * the PEM material failed to load
/// * rustls refused the certificate/key pair
pub fn get_rustls_config(options: &FieldSessionOptions) -> anyhow::Result<rustls::ServerConfig> {
    let certfile = options
        .certfile
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("tls is enabled but 'certfile' is not set"))?;
    let keyfile = options
        .keyfile
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("tls is enabled but 'keyfile' is not set"))?;

    let certs = crate::parser::tls_certificate::from_path(certfile)?;
    let private_key = crate::parser::tls_private_key::from_path(keyfile)?;

    let mut tls_config = rustls::ServerConfig::builder()
        .with_safe_defaults()
        .with_no_client_auth()
        .with_single_cert(certs, private_key)
        .map_err(|e| anyhow::anyhow!("cannot initialize tls config: '{e}'"))?;

    tls_config.key_log = std::sync::Arc::new(TlsLogger {});

    Ok(tls_config)
}
