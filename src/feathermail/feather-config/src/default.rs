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

use crate::config::field::{
    FieldServer, FieldServerLogs, FieldServerSmtp, FieldServerSmtpError, FieldSessionOptions,
    FieldStore,
};
use crate::TlsMode;

impl Default for FieldServer {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            domain: Self::default_domain(),
            address: Self::default_address(),
            port: Self::default_port(),
            client_count_max: Self::default_client_count_max(),
            session_options: FieldSessionOptions::default(),
            logs: FieldServerLogs::default(),
            store: FieldStore::default(),
            smtp: FieldServerSmtp::default(),
        }
    }
}

impl FieldServer {
    pub(crate) fn default_name() -> String {
        "feathermail".to_string()
    }

    pub(crate) fn default_domain() -> String {
        "localhost".to_string()
    }

    pub(crate) fn default_address() -> std::net::IpAddr {
        std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED)
    }

    pub(crate) const fn default_port() -> u16 {
        feather_common::SMTP_PORT
    }

    pub(crate) const fn default_client_count_max() -> i64 {
        -1
    }
}

impl Default for FieldSessionOptions {
    fn default() -> Self {
        Self {
            tls: Self::default_tls(),
            certfile: None,
            keyfile: None,
            cacerts: None,
            max_message_size: Self::default_max_message_size(),
            handshake_timeout: Self::default_handshake_timeout(),
        }
    }
}

impl FieldSessionOptions {
    pub(crate) const fn default_tls() -> TlsMode {
        TlsMode::Never
    }

    pub(crate) const fn default_max_message_size() -> usize {
        10_485_760
    }

    pub(crate) const fn default_handshake_timeout() -> std::time::Duration {
        std::time::Duration::from_secs(10)
    }
}

impl Default for FieldServerLogs {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl FieldServerLogs {
    pub(crate) fn default_level() -> Vec<tracing_subscriber::filter::Directive> {
        vec!["info".parse().expect("hardcoded value is valid")]
    }
}

impl Default for FieldStore {
    fn default() -> Self {
        Self {
            sweep_interval: Self::default_sweep_interval(),
        }
    }
}

impl FieldStore {
    pub(crate) const fn default_sweep_interval() -> std::time::Duration {
        std::time::Duration::from_secs(60)
    }
}

impl Default for FieldServerSmtpError {
    fn default() -> Self {
        Self {
            soft_count: 10,
            hard_count: 20,
            delay: std::time::Duration::from_secs(1),
        }
    }
}

impl Default for FieldServerSmtp {
    fn default() -> Self {
        Self {
            error: FieldServerSmtpError::default(),
            timeout_client: Self::default_timeout_client(),
            codes: std::collections::BTreeMap::default(),
        }
    }
}

impl FieldServerSmtp {
    pub(crate) const fn default_timeout_client() -> std::time::Duration {
        std::time::Duration::from_secs(5 * 60)
    }
}
