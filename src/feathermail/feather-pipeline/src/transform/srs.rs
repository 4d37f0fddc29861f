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

use super::Transformer;
use feather_auth::{Srs, SrsError};
use feather_common::Meta;

/// Rewrites the envelope sender to its SRS0 form when the message leaves
/// the local domains, so SPF keeps validating on the forwarding hop.
#[derive(Debug)]
pub struct SrsRewrite {
    srs: Srs,
    srs_domain: String,
    local_domains: std::collections::BTreeSet<String>,
}

impl SrsRewrite {
    ///
    #[must_use]
    pub fn new(
        secret: &str,
        srs_domain: String,
        local_domains: std::collections::BTreeSet<String>,
        max_age_days: u32,
    ) -> Self {
        Self {
            srs: Srs::new(secret, max_age_days),
            srs_domain,
            local_domains,
        }
    }

    fn is_local(&self, domain: &str) -> bool {
        self.local_domains.contains(&domain.to_lowercase())
    }
}

impl Transformer for SrsRewrite {
    fn kind(&self) -> &'static str {
        "srs_rewriter"
    }

    fn transform_meta(&mut self, meta: &mut Meta) -> anyhow::Result<()> {
        let Some(from) = &meta.from else {
            // the null reverse path is never rewritten
            return Ok(());
        };

        if from.local_part().starts_with("SRS0=") {
            return Ok(());
        }

        let any_external = meta.to.iter().any(|rcpt| !self.is_local(rcpt.domain()));
        if !any_external {
            return Ok(());
        }

        let rewritten = self.srs.rewrite(from, &self.srs_domain);
        tracing::debug!(from = %from, srs = %rewritten, "Envelope sender rewritten.");
        meta.from = Some(rewritten);
        Ok(())
    }
}

/// Decodes bounce recipients of the SRS0 form back to the original
/// sender; recipients that do not validate are left untouched.
#[derive(Debug)]
pub struct SrsBounce {
    srs: Srs,
}

impl SrsBounce {
    ///
    #[must_use]
    pub fn new(secret: &str, max_age_days: u32) -> Self {
        Self {
            srs: Srs::new(secret, max_age_days),
        }
    }
}

impl Transformer for SrsBounce {
    fn kind(&self) -> &'static str {
        "srs_bounce_handler"
    }

    fn transform_meta(&mut self, meta: &mut Meta) -> anyhow::Result<()> {
        for rcpt in &mut meta.to {
            match self.srs.decode(rcpt) {
                Ok(original) => {
                    tracing::debug!(srs = %rcpt, original = %original, "Bounce recipient decoded.");
                    *rcpt = original;
                }
                Err(SrsError::NotSrs) => {}
                Err(error) => {
                    tracing::warn!(rcpt = %rcpt, %error, "Rejecting stale or forged SRS bounce address.");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use feather_common::addr;

    fn meta_for(from: &str, to: &[&str]) -> Meta {
        let mut meta = Meta::new("192.0.2.1".parse().unwrap());
        meta.from = Some(addr!(from));
        meta.to = to.iter().map(|a| addr!(a)).collect();
        meta
    }

    fn rewriter() -> SrsRewrite {
        SrsRewrite::new(
            "secret",
            "forwarder.net".to_string(),
            ["example.com".to_string()].into_iter().collect(),
            21,
        )
    }

    #[test]
    fn external_recipient_triggers_rewrite() {
        let mut meta = meta_for("alice@example.com", &["bob@elsewhere.com"]);
        rewriter().transform_meta(&mut meta).unwrap();

        let from = meta.from.unwrap();
        assert_eq!(from.domain(), "forwarder.net");
        assert!(from.local_part().starts_with("SRS0="));
    }

    #[test]
    fn local_only_stays() {
        let mut meta = meta_for("alice@example.com", &["bob@example.com"]);
        rewriter().transform_meta(&mut meta).unwrap();
        assert_eq!(meta.from, Some(addr!("alice@example.com")));
    }

    #[test]
    fn already_srs_stays() {
        let mut meta = meta_for("alice@example.com", &["bob@elsewhere.com"]);
        rewriter().transform_meta(&mut meta).unwrap();
        let once = meta.from.clone().unwrap();

        rewriter().transform_meta(&mut meta).unwrap();
        assert_eq!(meta.from, Some(once), "no double rewrite");
    }

    // forward then bounce restores the original sender
    #[test]
    fn round_trip_through_bounce() {
        let mut meta = meta_for("alice@example.com", &["bob@elsewhere.com"]);
        rewriter().transform_meta(&mut meta).unwrap();

        let mut bounce = Meta::new("192.0.2.1".parse().unwrap());
        bounce.to = vec![meta.from.unwrap()];
        SrsBounce::new("secret", 21)
            .transform_meta(&mut bounce)
            .unwrap();

        assert_eq!(bounce.to, vec![addr!("alice@example.com")]);
    }

    #[test]
    fn forged_bounce_is_kept_as_is() {
        let mut bounce = Meta::new("192.0.2.1".parse().unwrap());
        bounce.to = vec![addr!("SRS0=dead=00=example.com=alice@forwarder.net")];
        SrsBounce::new("secret", 21)
            .transform_meta(&mut bounce)
            .unwrap();

        assert_eq!(
            bounce.to,
            vec![addr!("SRS0=dead=00=example.com=alice@forwarder.net")]
        );
    }
}
