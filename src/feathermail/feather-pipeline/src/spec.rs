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

use crate::stage::Stage;
use crate::stages::access::{
    BackscatterGuard, GuardConfig, IpFilter, RelayControl, SenderDomainValidator, SimpleAccess,
};
use crate::stages::auth::{NoAuth, PamAuth, ProvisionedAuth, SimpleAuth};
use crate::stages::limit::{MessageRateLimit, RecipientLimit, UserRateLimit};
use crate::stages::log::{LogBackendConfig, MailLogger};
use crate::stages::route::ByDomain;
use crate::transform::TransformerConfig;
use feather_common::parse_rules;
use feather_delivery::DeliveryConfig;

/// Environment variable overriding the keystore path of
/// `provisioned_auth`.
pub const ENV_KEYSTORE_PATH: &str = "FEATHER_KEYSTORE_PATH";
/// Environment variable providing the AEAD secret of `provisioned_auth`.
pub const ENV_SECRET_KEY: &str = "FEATHER_SECRET_KEY";

/// Read-only session facts handed to stage construction.
#[derive(Debug, Clone)]
pub struct SessionCtx {
    /// Peer address of the connection.
    pub peer_ip: std::net::IpAddr,
    /// Is the session already under TLS ?
    pub tls_active: bool,
    /// Domain of this server.
    pub server_domain: String,
    /// Session-wide maximum message size.
    pub max_message_size: usize,
    /// The process-wide TTL store.
    pub store: std::sync::Arc<feather_store::TtlStore>,
}

/// One pipeline element of the configuration document: the adapter kind
/// and its typed options. The set of kinds is closed at compile time;
/// an unknown kind fails validation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum StageConfig {
    /// [`SimpleAuth`]
    SimpleAuth {
        /// `user → password`.
        users: std::collections::BTreeMap<String, String>,
    },
    /// [`ProvisionedAuth`]
    ProvisionedAuth {
        /// Keystore path; `$FEATHER_KEYSTORE_PATH` when absent.
        keystore: Option<std::path::PathBuf>,
        /// AEAD secret; `$FEATHER_SECRET_KEY` when absent.
        secret_key: Option<String>,
    },
    /// [`PamAuth`]
    PamAuth {
        /// Helper binary; `pam_auth` from `$PATH` when absent.
        helper: Option<std::path::PathBuf>,
    },
    /// [`NoAuth`]
    NoAuth {
        /// Trusted identity; `trusted@localhost` when absent.
        user: Option<String>,
    },
    /// [`SimpleAccess`]
    SimpleAccess {
        /// Accepted recipient patterns.
        patterns: Vec<String>,
    },
    /// [`RelayControl`]
    RelayControl {
        /// Domains this server accepts mail for.
        #[serde(default)]
        local_domains: Vec<String>,
        /// Sources allowed to relay; invalid rules are dropped.
        #[serde(default)]
        trusted_ips: Vec<String>,
    },
    /// [`IpFilter`]
    IpFilter {
        /// Blocked sources; invalid rules are dropped.
        blocked_ips: Vec<String>,
    },
    /// [`SenderDomainValidator`]
    SenderDomainValidator {
        /// Domains allowed as envelope sender.
        #[serde(default)]
        allowed_domains: Vec<String>,
        /// Let authenticated sessions through regardless.
        #[serde(default)]
        require_auth_for_relay: bool,
    },
    /// [`BackscatterGuard`]
    BackscatterGuard {
        /// The guards; a recipient any guard knows is accepted.
        guards: Vec<GuardConfig>,
    },
    /// [`MessageRateLimit`]
    MessageRateLimit {
        /// Ceiling per window and client address.
        max_messages: i64,
        /// The window.
        #[serde(with = "humantime_serde")]
        time_window: std::time::Duration,
        /// Sources never limited; invalid rules are dropped.
        #[serde(default)]
        exempt_ips: Vec<String>,
    },
    /// [`UserRateLimit`]
    UserRateLimit {
        /// Ceiling per window and authenticated user.
        max_messages: i64,
        /// The window.
        #[serde(with = "humantime_serde")]
        time_window: std::time::Duration,
        /// Users never limited.
        #[serde(default)]
        exempt_users: Vec<String>,
    },
    /// [`RecipientLimit`]
    RecipientLimit {
        /// Ceiling per transaction.
        max_recipients: usize,
        /// Ceiling for authenticated sessions; `max_recipients` when
        /// absent.
        authenticated_max_recipients: Option<usize>,
    },
    /// [`ByDomain`]
    ByDomain {
        /// `domain → transport`; the `default` key is the fallback.
        #[serde(default)]
        routes: std::collections::BTreeMap<String, DeliveryConfig>,
        /// The embedded transformer sub-pipeline.
        #[serde(default)]
        transformers: Vec<TransformerConfig>,
    },
    /// [`MailLogger`]
    MailLogger {
        /// Where the lines go.
        #[serde(default = "default_log_backends")]
        backends: Vec<LogBackendConfig>,
        /// Replace passwords with `***`.
        #[serde(default = "default_sanitize")]
        sanitize: bool,
    },
}

fn default_log_backends() -> Vec<LogBackendConfig> {
    vec![LogBackendConfig::Console]
}

const fn default_sanitize() -> bool {
    true
}

impl StageConfig {
    /// The registry identifier of this configuration.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SimpleAuth { .. } => "simple_auth",
            Self::ProvisionedAuth { .. } => "provisioned_auth",
            Self::PamAuth { .. } => "pam_auth",
            Self::NoAuth { .. } => "no_auth",
            Self::SimpleAccess { .. } => "simple_access",
            Self::RelayControl { .. } => "relay_control",
            Self::IpFilter { .. } => "ip_filter",
            Self::SenderDomainValidator { .. } => "sender_domain_validator",
            Self::BackscatterGuard { .. } => "backscatter_guard",
            Self::MessageRateLimit { .. } => "message_rate_limit",
            Self::UserRateLimit { .. } => "user_rate_limit",
            Self::RecipientLimit { .. } => "recipient_limit",
            Self::ByDomain { .. } => "by_domain",
            Self::MailLogger { .. } => "mail_logger",
        }
    }

    /// Validate the options without building a session.
    ///
    /// # Errors
    ///
    /// * an option is unusable (pattern does not compile, ...)
    pub fn validate(&self) -> anyhow::Result<()> {
        match self {
            Self::SimpleAccess { patterns } => {
                for pattern in patterns {
                    regex::Regex::new(pattern)?;
                }
                Ok(())
            }
            Self::BackscatterGuard { guards } => {
                guards.iter().try_for_each(GuardConfig::validate)
            }
            Self::ByDomain { transformers, .. } => transformers
                .iter()
                .try_for_each(TransformerConfig::validate),
            _ => Ok(()),
        }
    }

    /// Instantiate the stage for one session.
    ///
    /// # Errors
    ///
    /// * an option is unusable or required material is missing
    pub fn build(&self, ctx: &SessionCtx) -> anyhow::Result<Box<dyn Stage>> {
        Ok(match self {
            Self::SimpleAuth { users } => Box::new(SimpleAuth::new(users.clone())),
            Self::ProvisionedAuth {
                keystore,
                secret_key,
            } => {
                let path = keystore.clone().or_else(|| {
                    std::env::var_os(ENV_KEYSTORE_PATH).map(std::path::PathBuf::from)
                });
                let keystore = match path {
                    Some(path) => feather_auth::Keystore::load(&path)?,
                    None => {
                        tracing::warn!("No keystore configured, starting empty.");
                        feather_auth::Keystore::default()
                    }
                };

                let secret_key = secret_key
                    .clone()
                    .or_else(|| std::env::var(ENV_SECRET_KEY).ok())
                    .ok_or_else(|| {
                        anyhow::anyhow!(
                            "provisioned_auth needs 'secret_key' or ${ENV_SECRET_KEY}"
                        )
                    })?;

                Box::new(ProvisionedAuth::new(keystore, secret_key))
            }
            Self::PamAuth { helper } => Box::new(PamAuth::new(
                helper
                    .clone()
                    .unwrap_or_else(|| std::path::PathBuf::from("pam_auth")),
            )),
            Self::NoAuth { user } => Box::new(NoAuth::new(user.clone())),
            Self::SimpleAccess { patterns } => Box::new(SimpleAccess::new(
                patterns
                    .iter()
                    .map(|p| regex::Regex::new(p))
                    .collect::<Result<_, _>>()?,
            )),
            Self::RelayControl {
                local_domains,
                trusted_ips,
            } => Box::new(RelayControl::new(
                local_domains.iter().map(|d| d.to_lowercase()).collect(),
                parse_rules(trusted_ips),
            )),
            Self::IpFilter { blocked_ips } => Box::new(IpFilter::new(parse_rules(blocked_ips))),
            Self::SenderDomainValidator {
                allowed_domains,
                require_auth_for_relay,
            } => Box::new(SenderDomainValidator::new(
                allowed_domains.iter().map(|d| d.to_lowercase()).collect(),
                *require_auth_for_relay,
            )),
            Self::BackscatterGuard { guards } => Box::new(BackscatterGuard::new(
                guards
                    .iter()
                    .map(GuardConfig::build)
                    .collect::<Result<_, _>>()?,
            )),
            Self::MessageRateLimit {
                max_messages,
                time_window,
                exempt_ips,
            } => Box::new(MessageRateLimit::new(
                ctx.store.clone(),
                *max_messages,
                *time_window,
                parse_rules(exempt_ips),
            )),
            Self::UserRateLimit {
                max_messages,
                time_window,
                exempt_users,
            } => Box::new(UserRateLimit::new(
                ctx.store.clone(),
                *max_messages,
                *time_window,
                exempt_users.iter().cloned().collect(),
            )),
            Self::RecipientLimit {
                max_recipients,
                authenticated_max_recipients,
            } => Box::new(RecipientLimit::new(
                *max_recipients,
                *authenticated_max_recipients,
            )),
            Self::ByDomain {
                routes,
                transformers,
            } => Box::new(ByDomain::new(
                routes
                    .iter()
                    .map(|(domain, config)| (domain.to_lowercase(), config.build()))
                    .collect(),
                transformers
                    .iter()
                    .map(TransformerConfig::build)
                    .collect::<Result<_, _>>()?,
            )),
            Self::MailLogger { backends, sanitize } => {
                Box::new(MailLogger::new(backends, *sanitize))
            }
        })
    }
}

/// The ordered, immutable pipeline: what `pipeline.toml` declares.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSpec {
    /// The stages, in traversal order.
    #[serde(default, rename = "stage")]
    pub stages: Vec<StageConfig>,
}

impl PipelineSpec {
    /// Parse and validate a pipeline document.
    ///
    /// # Errors
    ///
    /// * the document is not valid TOML, a kind is unknown, or an option
    ///   is unusable
    pub fn from_toml(input: &str) -> anyhow::Result<Self> {
        let spec = toml::from_str::<Self>(input)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Validate every stage.
    ///
    /// # Errors
    ///
    /// * see [`StageConfig::validate`]
    pub fn validate(&self) -> anyhow::Result<()> {
        for stage in &self.stages {
            stage
                .validate()
                .map_err(|error| anyhow::anyhow!("stage '{}': {error}", stage.kind()))?;
        }
        Ok(())
    }

    /// Instantiate the pipeline for one session, in order.
    ///
    /// # Errors
    ///
    /// * see [`StageConfig::build`]
    pub fn build(&self, ctx: &SessionCtx) -> anyhow::Result<Vec<Box<dyn Stage>>> {
        self.stages
            .iter()
            .map(|stage| {
                stage
                    .build(ctx)
                    .map_err(|error| anyhow::anyhow!("stage '{}': {error}", stage.kind()))
            })
            .collect()
    }
}
