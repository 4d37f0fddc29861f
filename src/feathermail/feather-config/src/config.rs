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

use feather_common::{CodeId, Reply};

/// How the listener negotiates TLS.
#[derive(
    Debug,
    Copy,
    Clone,
    PartialEq,
    Eq,
    strum::Display,
    strum::EnumString,
    serde_with::DeserializeFromStr,
    serde_with::SerializeDisplay,
)]
#[strum(serialize_all = "snake_case")]
pub enum TlsMode {
    /// Implicit TLS: the handshake runs before the greeting.
    Always,
    /// Plain connection; STARTTLS is advertised and accepted.
    IfAvailable,
    /// No TLS at all.
    Never,
}

/// The server configuration, bound once at boot.
///
/// Loaded from `<config folder>/server.toml`, see [`crate::Config::from_toml`].
/// All fields are optional and defaulted if missing.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// FeatherMail's version requirement to parse this configuration file.
    pub version_requirement: semver::VersionReq,
    /// see [`field::FieldServer`]
    #[serde(default)]
    pub server: field::FieldServer,
}

/// The inner fields of the configuration.
#[allow(clippy::module_name_repetitions)]
pub mod field {
    use super::{CodeId, Reply, TlsMode};

    /// Server-wide settings.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldServer {
        /// Name of the server, used in the greeting.
        #[serde(default = "FieldServer::default_name")]
        pub name: String,
        /// Domain announced in the greeting and used as the default local
        /// domain. Overridden by `$FEATHER_DOMAIN`.
        #[serde(default = "FieldServer::default_domain")]
        pub domain: String,
        /// Address the listener binds to.
        #[serde(default = "FieldServer::default_address")]
        pub address: std::net::IpAddr,
        /// Port the listener binds to.
        #[serde(default = "FieldServer::default_port")]
        pub port: u16,
        /// Maximum number of clients served at the same time, `-1` for
        /// unlimited.
        #[serde(default = "FieldServer::default_client_count_max")]
        pub client_count_max: i64,
        /// see [`FieldSessionOptions`]
        #[serde(default)]
        pub session_options: FieldSessionOptions,
        /// see [`FieldServerLogs`]
        #[serde(default)]
        pub logs: FieldServerLogs,
        /// see [`FieldStore`]
        #[serde(default)]
        pub store: FieldStore,
        /// see [`FieldServerSmtp`]
        #[serde(default)]
        pub smtp: FieldServerSmtp,
    }

    /// Session-wide immutable options.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldSessionOptions {
        /// TLS mode of the listener.
        #[serde(default = "FieldSessionOptions::default_tls")]
        pub tls: TlsMode,
        /// Certificate chain, PEM. Overridden by `$FEATHER_TLS_CERT_PATH`.
        pub certfile: Option<std::path::PathBuf>,
        /// Private key, PEM. Overridden by `$FEATHER_TLS_KEY_PATH`.
        pub keyfile: Option<std::path::PathBuf>,
        /// CA bundle handed to delivery transports.
        pub cacerts: Option<std::path::PathBuf>,
        /// Maximum size in bytes of a message.
        #[serde(default = "FieldSessionOptions::default_max_message_size")]
        pub max_message_size: usize,
        /// Timeout of the TLS handshake.
        #[serde(with = "humantime_serde")]
        #[serde(default = "FieldSessionOptions::default_handshake_timeout")]
        pub handshake_timeout: std::time::Duration,
    }

    /// Settings of the `tracing` output.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldServerLogs {
        /// Log level directives, see
        /// <https://docs.rs/tracing-subscriber/latest/tracing_subscriber/filter/struct.EnvFilter.html>
        #[serde(
            default = "FieldServerLogs::default_level",
            serialize_with = "crate::parser::tracing_directive::serialize",
            deserialize_with = "crate::parser::tracing_directive::deserialize"
        )]
        pub level: Vec<tracing_subscriber::filter::Directive>,
    }

    /// Settings of the TTL store.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldStore {
        /// Interval of the background sweep of expired entries.
        #[serde(with = "humantime_serde")]
        #[serde(default = "FieldStore::default_sweep_interval")]
        pub sweep_interval: std::time::Duration,
    }

    /// Client error escalation policy.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldServerSmtpError {
        /// Number of errors before each response is delayed, `-1` to
        /// disable.
        pub soft_count: i64,
        /// Number of errors before the client is disconnected, `-1` to
        /// disable.
        pub hard_count: i64,
        /// Delay applied between responses after `soft_count` errors.
        #[serde(with = "humantime_serde")]
        pub delay: std::time::Duration,
    }

    /// SMTP-level parameters.
    #[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
    #[serde(deny_unknown_fields)]
    pub struct FieldServerSmtp {
        /// Error escalation policy.
        #[serde(default)]
        pub error: FieldServerSmtpError,
        /// Idle timeout of the session; no reply is sent when it fires.
        #[serde(with = "humantime_serde")]
        #[serde(default = "FieldServerSmtp::default_timeout_client")]
        pub timeout_client: std::time::Duration,
        /// Overrides of the replies sent by the engine.
        #[serde(default)]
        pub codes: std::collections::BTreeMap<CodeId, Reply>,
    }

    impl FieldServerSmtp {
        /// Resolve the reply for `code`, from the overrides or the default
        /// table.
        #[must_use]
        pub fn reply(&self, code: CodeId) -> Reply {
            self.codes
                .get(&code)
                .cloned()
                .unwrap_or_else(|| code.default_reply())
        }
    }
}
