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

use feather_common::Address;
use hmac::{Hmac, Mac};
use sha2::Sha256;

const BASE36: &[u8; 36] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// The timestamp wraps around after 1024 days.
const TIMESTAMP_MODULUS: u32 = 1024;

/// Sender Rewriting Scheme.
///
/// Rewrites the envelope sender of forwarded mail to
/// `SRS0=<hash>=<ts>=<orig_domain>=<orig_local>@<srs_domain>` so the
/// forwarding host stays SPF-authorized, and decodes bounces addressed to
/// such a mailbox back to the original sender.
#[derive(Debug, Clone)]
pub struct Srs {
    secret: String,
    max_age_days: u32,
}

/// A decoded `SRS0` local part.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrsAddress {
    /// 2-byte HMAC prefix, lowercase hex.
    pub hash: String,
    /// 2-digit base36 day stamp.
    pub ts: String,
    /// Original sender domain.
    pub domain: String,
    /// Original sender local part.
    pub local: String,
}

/// Rejection while decoding a bounce.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SrsError {
    /// The local part is not of the `SRS0=H=T=D=L` form.
    #[error("not an SRS0 address")]
    NotSrs,
    /// The day stamp is not two base36 digits.
    #[error("invalid timestamp '{0}'")]
    BadTimestamp(String),
    /// The day stamp is older than `max_age_days` (modulo wraparound).
    #[error("timestamp expired: {age} days old")]
    Expired {
        /// Age in days, after wraparound.
        age: u32,
    },
    /// The HMAC does not validate.
    #[error("hash mismatch")]
    BadHash,
}

fn encode_ts(day: u32) -> String {
    let day = day % TIMESTAMP_MODULUS;
    [
        BASE36[(day / 36) as usize % 36] as char,
        BASE36[(day % 36) as usize] as char,
    ]
    .into_iter()
    .collect()
}

fn decode_ts(ts: &str) -> Option<u32> {
    let digit = |c: char| {
        BASE36
            .iter()
            .position(|&b| b as char == c.to_ascii_uppercase())
    };

    let mut chars = ts.chars();
    let (hi, lo) = (chars.next()?, chars.next()?);
    if chars.next().is_some() {
        return None;
    }

    #[allow(clippy::cast_possible_truncation)]
    Some((digit(hi)? * 36 + digit(lo)?) as u32 % TIMESTAMP_MODULUS)
}

fn days_since_epoch() -> u32 {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock is after the unix epoch")
        .as_secs();

    #[allow(clippy::cast_possible_truncation)]
    {
        (secs / 86_400) as u32
    }
}

impl Srs {
    /// Create a rewriting scheme over `secret`, accepting bounces up to
    /// `max_age_days` old.
    #[must_use]
    pub fn new(secret: impl Into<String>, max_age_days: u32) -> Self {
        Self {
            secret: secret.into(),
            max_age_days,
        }
    }

    fn hash(&self, ts: &str, domain: &str, local: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(self.secret.as_bytes())
            .expect("hmac accepts any key length");
        mac.update(ts.as_bytes());
        mac.update(domain.as_bytes());
        mac.update(local.as_bytes());

        let digest = mac.finalize().into_bytes();
        format!("{:02x}{:02x}", digest[0], digest[1])
    }

    /// Rewrite `sender` into its SRS0 form under `srs_domain`.
    #[must_use]
    pub fn rewrite(&self, sender: &Address, srs_domain: &str) -> Address {
        self.rewrite_at(sender, srs_domain, days_since_epoch())
    }

    fn rewrite_at(&self, sender: &Address, srs_domain: &str, day: u32) -> Address {
        let ts = encode_ts(day);
        let hash = self.hash(&ts, sender.domain(), sender.local_part());

        Address::new_unchecked(format!(
            "SRS0={hash}={ts}={}={}@{srs_domain}",
            sender.domain(),
            sender.local_part(),
        ))
    }

    /// Parse `recipient`'s local part as `SRS0=H=T=D=L` without validating.
    ///
    /// # Errors
    ///
    /// * [`SrsError::NotSrs`] when the local part has another shape
    pub fn parse(recipient: &Address) -> Result<SrsAddress, SrsError> {
        let local = recipient.local_part();
        let rest = local.strip_prefix("SRS0=").ok_or(SrsError::NotSrs)?;

        let mut fields = rest.splitn(4, '=');
        match (fields.next(), fields.next(), fields.next(), fields.next()) {
            (Some(hash), Some(ts), Some(domain), Some(local))
                if !domain.is_empty() && !local.is_empty() =>
            {
                Ok(SrsAddress {
                    hash: hash.to_string(),
                    ts: ts.to_string(),
                    domain: domain.to_string(),
                    local: local.to_string(),
                })
            }
            _ => Err(SrsError::NotSrs),
        }
    }

    /// Validate a bounce recipient and return the original sender address.
    ///
    /// # Errors
    ///
    /// * the address is not SRS0, the stamp is expired, or the hash is wrong
    pub fn decode(&self, recipient: &Address) -> Result<Address, SrsError> {
        self.decode_at(recipient, days_since_epoch())
    }

    fn decode_at(&self, recipient: &Address, today: u32) -> Result<Address, SrsError> {
        let srs = Self::parse(recipient)?;

        let stamp =
            decode_ts(&srs.ts).ok_or_else(|| SrsError::BadTimestamp(srs.ts.clone()))?;

        let age = (today % TIMESTAMP_MODULUS + TIMESTAMP_MODULUS - stamp) % TIMESTAMP_MODULUS;
        if age > self.max_age_days {
            return Err(SrsError::Expired { age });
        }

        let expected = self.hash(&srs.ts, &srs.domain, &srs.local);
        if !expected.eq_ignore_ascii_case(&srs.hash) {
            return Err(SrsError::BadHash);
        }

        Ok(Address::new_unchecked(format!(
            "{}@{}",
            srs.local, srs.domain
        )))
    }
}
