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

//! FeatherMail configuration
//!
//! The server configuration (`server.toml`) is bound once at boot; only the
//! pipeline document (`pipeline.toml`, owned by `feather-pipeline`) is
//! hot-reloadable. All fields are optional and defaulted, except the
//! `version_requirement` gate.

#![doc(html_no_source)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod parser {
    pub mod tls_certificate;
    pub mod tls_private_key;
    pub mod tracing_directive;
}

mod config;
mod default;
mod rustls_helper;

pub use config::{field, Config, TlsMode};
pub use rustls_helper::get_rustls_config;

/// Environment variable overriding the configuration folder.
pub const ENV_CONFIG_FOLDER: &str = "FEATHER_CONFIG_FOLDER";
/// Environment variable overriding `server.domain`.
pub const ENV_DOMAIN: &str = "FEATHER_DOMAIN";
/// Environment variable overriding `server.session_options.keyfile`.
pub const ENV_TLS_KEY_PATH: &str = "FEATHER_TLS_KEY_PATH";
/// Environment variable overriding `server.session_options.certfile`.
pub const ENV_TLS_CERT_PATH: &str = "FEATHER_TLS_CERT_PATH";

/// Resolve the configuration folder: `$FEATHER_CONFIG_FOLDER`, else the
/// OS default.
#[must_use]
pub fn config_folder() -> std::path::PathBuf {
    if let Some(folder) = std::env::var_os(ENV_CONFIG_FOLDER) {
        return std::path::PathBuf::from(folder);
    }

    if cfg!(any(
        target_os = "freebsd",
        target_os = "openbsd",
        target_os = "netbsd"
    )) {
        std::path::PathBuf::from("/usr/local/etc/feather")
    } else {
        std::path::PathBuf::from("/etc/feather")
    }
}

/// Path of the server configuration document.
#[must_use]
pub fn server_config_path() -> std::path::PathBuf {
    config_folder().join("server.toml")
}

/// Path of the hot-reloadable pipeline document.
#[must_use]
pub fn pipeline_config_path() -> std::path::PathBuf {
    config_folder().join("pipeline.toml")
}

impl Config {
    /// Parse a [`Config`] from its TOML document and apply the environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// * data is not valid TOML, or a field is unknown
    /// * the version requirement is not fulfilled
    pub fn from_toml(input: &str) -> anyhow::Result<Self> {
        #[derive(serde::Deserialize)]
        struct VersionRequirement {
            version_requirement: semver::VersionReq,
        }

        let version_requirement = toml::from_str::<VersionRequirement>(input)?.version_requirement;
        let pkg_version = semver::Version::parse(env!("CARGO_PKG_VERSION"))?;

        if !version_requirement.matches(&pkg_version) {
            anyhow::bail!(
                "Version requirement not fulfilled: expected '{version_requirement}' but got '{pkg_version}'"
            );
        }

        let mut config = toml::from_str::<Self>(input)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(domain) = std::env::var(ENV_DOMAIN) {
            self.server.domain = domain;
        }
        if let Some(certfile) = std::env::var_os(ENV_TLS_CERT_PATH) {
            self.server.session_options.certfile = Some(std::path::PathBuf::from(certfile));
        }
        if let Some(keyfile) = std::env::var_os(ENV_TLS_KEY_PATH) {
            self.server.session_options.keyfile = Some(std::path::PathBuf::from(keyfile));
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn minimal_document() {
        let config = Config::from_toml(r#"version_requirement = ">=0.1.0""#).unwrap();
        assert_eq!(config.server.name, "feathermail");
        assert_eq!(config.server.port, 25);
        assert_eq!(config.server.session_options.max_message_size, 10_485_760);
        assert_eq!(config.server.session_options.tls, TlsMode::Never);
    }

    #[test]
    fn version_gate() {
        assert!(Config::from_toml(r#"version_requirement = ">=99.0.0""#).is_err());
    }

    #[test]
    fn unknown_field_is_rejected() {
        let input = r#"
version_requirement = ">=0.1.0"

[server]
not_a_field = true
"#;
        assert!(Config::from_toml(input).is_err());
    }

    #[test]
    fn full_document() {
        let input = r#"
version_requirement = ">=0.1.0"

[server]
name = "mx1"
domain = "mail.example.com"
address = "127.0.0.1"
port = 2525

[server.session_options]
tls = "if_available"
max_message_size = 1024

[server.store]
sweep_interval = "30s"

[server.smtp]
timeout_client = "2m"

[server.smtp.error]
soft_count = 5
hard_count = 10
delay = "500ms"

[server.smtp.codes]
Ok = "250 2.0.0 all good"
"#;
        let config = Config::from_toml(input).unwrap();
        assert_eq!(config.server.domain, "mail.example.com");
        assert_eq!(config.server.session_options.tls, TlsMode::IfAvailable);
        assert_eq!(
            config.server.store.sweep_interval,
            std::time::Duration::from_secs(30)
        );
        assert_eq!(config.server.smtp.error.soft_count, 5);
        assert_eq!(
            config
                .server
                .smtp
                .reply(feather_common::CodeId::Ok)
                .fold(),
            "250 2.0.0 all good\r\n"
        );
        // non-overridden codes fall back to the default table
        assert_eq!(
            config
                .server
                .smtp
                .reply(feather_common::CodeId::Closing)
                .fold(),
            "221 Service closing transmission channel\r\n"
        );
    }
}
