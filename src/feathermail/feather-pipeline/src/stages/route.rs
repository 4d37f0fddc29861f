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

//! The delivery stage: runs the embedded transformer sub-pipeline, groups
//! the recipients by domain, and hands each group to the transport its
//! route names.

use crate::stage::{HaltReason, Stage, Verdict};
use crate::transform::{self, Transformer};
use feather_common::{Address, Meta, Reply};
use feather_delivery::{DeliveryError, Transport};

/// Route key of the fallback transport.
pub const DEFAULT_ROUTE: &str = "default";

/// Delivery grouped by recipient domain.
pub struct ByDomain {
    routes: std::collections::BTreeMap<String, std::sync::Arc<dyn Transport>>,
    transformers: Vec<Box<dyn Transformer>>,
}

impl std::fmt::Debug for ByDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByDomain")
            .field("routes", &self.routes.keys().collect::<Vec<_>>())
            .field("transformers", &self.transformers)
            .finish()
    }
}

impl ByDomain {
    ///
    #[must_use]
    pub fn new(
        routes: std::collections::BTreeMap<String, std::sync::Arc<dyn Transport>>,
        transformers: Vec<Box<dyn Transformer>>,
    ) -> Self {
        Self {
            routes,
            transformers,
        }
    }

    fn route_for(&self, domain: &str) -> Option<&std::sync::Arc<dyn Transport>> {
        self.routes
            .get(domain)
            .or_else(|| self.routes.get(DEFAULT_ROUTE))
    }

    /// Recipients grouped by lowercased domain, first-seen order kept.
    fn group_by_domain(to: &[Address]) -> Vec<(String, Vec<Address>)> {
        let mut groups: Vec<(String, Vec<Address>)> = vec![];
        for rcpt in to {
            let domain = rcpt.domain().to_lowercase();
            match groups.iter_mut().find(|(d, _)| *d == domain) {
                Some((_, group)) => group.push(rcpt.clone()),
                None => groups.push((domain, vec![rcpt.clone()])),
            }
        }
        groups
    }
}

#[async_trait::async_trait]
impl Stage for ByDomain {
    fn kind(&self) -> &'static str {
        "by_domain"
    }

    async fn data(&mut self, raw: &[u8], meta: &mut Meta) -> anyhow::Result<Verdict> {
        let mut rewritten = raw.to_vec();
        transform::run(&mut self.transformers, &mut rewritten, meta)?;

        for (domain, group) in Self::group_by_domain(&meta.to) {
            let Some(transport) = self.route_for(&domain) else {
                return Ok(Verdict::Halt(HaltReason::NoRoute { domain }));
            };

            // the transport sees the envelope scoped to its group
            let mut scoped = meta.clone();
            scoped.to = group.clone();

            match transport.deliver(&scoped, &group, &rewritten).await {
                Ok(()) => {}
                Err(DeliveryError::Transient(message)) => {
                    return Ok(Verdict::Halt(HaltReason::Transient { message }));
                }
                Err(DeliveryError::Permanent(message)) => {
                    return Ok(Verdict::Halt(HaltReason::Permanent { message }));
                }
            }
        }

        Ok(Verdict::Continue)
    }

    fn format_reason(&self, reason: &HaltReason) -> Option<Reply> {
        match reason {
            HaltReason::NoRoute { domain } => {
                format!("554 5.4.4 No route to domain {domain}").parse().ok()
            }
            HaltReason::Transient { message } => format!("451 4.4.1 {message}").parse().ok(),
            HaltReason::Permanent { message } => format!("554 5.0.0 {message}").parse().ok(),
            _ => None,
        }
    }
}
