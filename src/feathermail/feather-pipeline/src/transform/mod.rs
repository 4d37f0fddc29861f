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

//! The transformer sub-pipeline run inside delivery stages, before the
//! external delivery action: first every transformer's metadata rewrite,
//! in order, then every transformer's data rewrite, in order.

mod alias;
mod dkim;
mod matchers;
mod srs;

pub use alias::{expand_aliases, parse_alias_file, AliasResolver, FileAliasResolver};
pub use dkim::DkimSign;
pub use matchers::{DefaultMailbox, MatchBody, MatchHeader, MatchRcptTo, MatchSender};
pub use srs::{SrsBounce, SrsRewrite};

use feather_common::Meta;

/// A message transformer.
///
/// Both capabilities default to the identity; implementations override
/// the one(s) they provide.
pub trait Transformer: Send + std::fmt::Debug {
    /// The registry identifier of this transformer.
    fn kind(&self) -> &'static str;

    /// Pure rewrite of the envelope metadata.
    ///
    /// # Errors
    ///
    /// * infrastructure failure (file access, ...)
    fn transform_meta(&mut self, _meta: &mut Meta) -> anyhow::Result<()> {
        Ok(())
    }

    /// Rewrite of the raw message and/or the metadata.
    ///
    /// # Errors
    ///
    /// * infrastructure failure (signing, ...)
    fn transform_data(&mut self, _raw: &mut Vec<u8>, _meta: &mut Meta) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Run the sub-pipeline over `(raw, meta)` in the contractual order.
///
/// # Errors
///
/// * the first transformer failure aborts the run
pub fn run(
    transformers: &mut [Box<dyn Transformer>],
    raw: &mut Vec<u8>,
    meta: &mut Meta,
) -> anyhow::Result<()> {
    for transformer in transformers.iter_mut() {
        transformer.transform_meta(meta)?;
    }
    for transformer in transformers.iter_mut() {
        transformer.transform_data(raw, meta)?;
    }
    Ok(())
}

/// One `pattern → mailbox` routing rule.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchRule {
    /// Regex applied to the subject of the matcher.
    pub pattern: String,
    /// Mailbox tag assigned on the first match.
    pub mailbox: String,
}

/// Typed configuration of the transformers, the closed set of `kind`s a
/// delivery stage can embed.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum TransformerConfig {
    /// Recursive alias expansion from an inline table.
    AliasResolver {
        /// `alias → targets`; keys are local parts.
        aliases: std::collections::BTreeMap<String, Vec<String>>,
        /// Expansion depth bound.
        #[serde(default = "default_alias_depth")]
        max_depth: usize,
    },
    /// Recursive alias expansion from an `/etc/aliases`-format file.
    FileAliasResolver {
        /// Path of the alias file.
        path: std::path::PathBuf,
        /// How long the parsed file is cached.
        #[serde(with = "humantime_serde", default = "default_alias_reload")]
        reload_interval: std::time::Duration,
        /// Expansion depth bound.
        #[serde(default = "default_alias_depth")]
        max_depth: usize,
    },
    /// Rewrite the envelope sender when forwarding off the local domains.
    SrsRewriter {
        /// HMAC secret.
        secret: String,
        /// Domain the rewritten sender lives under.
        srs_domain: String,
        /// Domains considered local (no rewrite needed).
        local_domains: Vec<String>,
        /// Bounce validation window, also used when decoding.
        #[serde(default = "default_srs_max_age")]
        max_age_days: u32,
    },
    /// Decode bounces addressed to an SRS0 mailbox.
    SrsBounceHandler {
        /// HMAC secret.
        secret: String,
        /// Bounce validation window.
        #[serde(default = "default_srs_max_age")]
        max_age_days: u32,
    },
    /// First rule matching the envelope sender sets `meta.mailbox`.
    MatchSender {
        /// The rules, in order.
        rules: Vec<MatchRule>,
    },
    /// First rule matching any recipient sets `meta.mailbox`.
    MatchRcptTo {
        /// The rules, in order.
        rules: Vec<MatchRule>,
    },
    /// First rule matching a header line sets `meta.mailbox`.
    MatchHeader {
        /// The rules, in order.
        rules: Vec<MatchRule>,
    },
    /// First rule matching a body line sets `meta.mailbox`.
    MatchBody {
        /// The rules, in order.
        rules: Vec<MatchRule>,
    },
    /// Set `meta.mailbox` when no previous transformer did.
    DefaultMailbox {
        /// The fallback tag.
        mailbox: String,
    },
    /// DKIM-sign the message.
    DkimSigner {
        /// Selector under `_domainkey`.
        selector: String,
        /// Signing domain.
        domain: String,
        /// PEM private key (PKCS#8 or PKCS#1).
        private_key: std::path::PathBuf,
        /// Signing algorithm; only `rsa-sha256` is supported.
        #[serde(default = "default_dkim_algorithm")]
        algorithm: String,
        /// Headers covered by the signature.
        #[serde(default = "default_dkim_headers")]
        headers: Vec<String>,
    },
}

const fn default_alias_depth() -> usize {
    10
}

const fn default_alias_reload() -> std::time::Duration {
    std::time::Duration::from_secs(60)
}

const fn default_srs_max_age() -> u32 {
    21
}

fn default_dkim_algorithm() -> String {
    "rsa-sha256".to_string()
}

fn default_dkim_headers() -> Vec<String> {
    ["From", "To", "Subject", "Date"].map(String::from).to_vec()
}

fn compile_rules(rules: &[MatchRule]) -> anyhow::Result<Vec<(regex::Regex, String)>> {
    rules
        .iter()
        .map(|rule| {
            Ok((
                regex::Regex::new(&rule.pattern)?,
                rule.mailbox.clone(),
            ))
        })
        .collect()
}

impl TransformerConfig {
    /// Validate without instantiating (regexes compile, algorithm known).
    ///
    /// # Errors
    ///
    /// * an option is unusable
    pub fn validate(&self) -> anyhow::Result<()> {
        match self {
            Self::MatchSender { rules }
            | Self::MatchRcptTo { rules }
            | Self::MatchHeader { rules }
            | Self::MatchBody { rules } => compile_rules(rules).map(|_| ()),
            Self::DkimSigner { algorithm, .. } => {
                anyhow::ensure!(
                    algorithm == "rsa-sha256",
                    "unsupported dkim algorithm '{algorithm}'"
                );
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Instantiate the transformer this configuration describes.
    ///
    /// # Errors
    ///
    /// * an option is unusable, or key material failed to load
    pub fn build(&self) -> anyhow::Result<Box<dyn Transformer>> {
        Ok(match self {
            Self::AliasResolver { aliases, max_depth } => {
                Box::new(AliasResolver::new(aliases.clone(), *max_depth))
            }
            Self::FileAliasResolver {
                path,
                reload_interval,
                max_depth,
            } => Box::new(FileAliasResolver::new(
                path.clone(),
                *reload_interval,
                *max_depth,
            )),
            Self::SrsRewriter {
                secret,
                srs_domain,
                local_domains,
                max_age_days,
            } => Box::new(SrsRewrite::new(
                secret,
                srs_domain.clone(),
                local_domains.iter().map(|d| d.to_lowercase()).collect(),
                *max_age_days,
            )),
            Self::SrsBounceHandler {
                secret,
                max_age_days,
            } => Box::new(SrsBounce::new(secret, *max_age_days)),
            Self::MatchSender { rules } => Box::new(MatchSender::new(compile_rules(rules)?)),
            Self::MatchRcptTo { rules } => Box::new(MatchRcptTo::new(compile_rules(rules)?)),
            Self::MatchHeader { rules } => Box::new(MatchHeader::new(compile_rules(rules)?)),
            Self::MatchBody { rules } => Box::new(MatchBody::new(compile_rules(rules)?)),
            Self::DefaultMailbox { mailbox } => Box::new(DefaultMailbox::new(mailbox.clone())),
            Self::DkimSigner {
                selector,
                domain,
                private_key,
                algorithm,
                headers,
            } => {
                anyhow::ensure!(
                    algorithm == "rsa-sha256",
                    "unsupported dkim algorithm '{algorithm}'"
                );
                Box::new(DkimSign::from_pem_file(
                    selector.clone(),
                    domain.clone(),
                    headers.clone(),
                    private_key,
                )?)
            }
        })
    }
}
