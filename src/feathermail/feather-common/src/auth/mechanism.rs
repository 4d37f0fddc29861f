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

/// Supported SASL mechanisms.
/// See <https://www.iana.org/assignments/sasl-mechanisms/sasl-mechanisms.xhtml>
#[derive(
    Debug,
    PartialEq,
    Eq,
    Copy,
    Clone,
    Hash,
    PartialOrd,
    Ord,
    strum::Display,
    strum::AsRefStr,
    strum::EnumString,
    serde_with::SerializeDisplay,
    serde_with::DeserializeFromStr,
)]
#[strum(serialize_all = "SCREAMING-KEBAB-CASE")]
pub enum Mechanism {
    /// Common, single base64 message `authzid \0 authcid \0 passwd`
    Plain,
    /// Obsolete, two server challenges
    Login,
}

impl Mechanism {
    /// Does the client send data first with an initial response ?
    #[must_use]
    pub const fn client_first(self) -> bool {
        match self {
            Self::Plain => true,
            Self::Login => false,
        }
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn to_str() {
        assert_eq!(Mechanism::Plain.to_string(), "PLAIN");
        assert_eq!(Mechanism::Login.to_string(), "LOGIN");
    }

    #[test]
    fn error() {
        assert!(<Mechanism as std::str::FromStr>::from_str("CRAM-MD5").is_err());
        assert!(<Mechanism as std::str::FromStr>::from_str("foobar").is_err());
    }
}
