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

/// Code at the start of each line of a reply
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(untagged)]
pub enum ReplyCode {
    /// simple reply code as defined in RFC5321
    Code {
        /// code base
        code: u16,
    },
    /// enhanced status code as defined in RFC3463
    Enhanced {
        /// code base
        code: u16,
        /// enhanced code triplet `class.subject.detail`
        enhanced: String,
    },
}

impl ReplyCode {
    /// Is this code an error (4yz or 5yz) ?
    #[must_use]
    pub fn is_error(&self) -> bool {
        match self {
            Self::Code { code, .. } | Self::Enhanced { code, .. } => code / 100 >= 4,
        }
    }

    /// Return the underlying value of the reply code
    #[must_use]
    pub fn value(&self) -> u16 {
        match self {
            Self::Code { code, .. } | Self::Enhanced { code, .. } => *code,
        }
    }

    /// Return the enhanced part of the reply code
    #[must_use]
    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Enhanced { enhanced, .. } => Some(enhanced),
            Self::Code { .. } => None,
        }
    }

    fn parse_enhanced(s: &str) -> Option<String> {
        let mut triplet = s.splitn(3, '.').map(str::parse::<u16>);

        let (a, b, c) = (
            triplet.next()?.ok()?,
            triplet.next()?.ok()?,
            triplet.next()?.ok()?,
        );
        Some(format!("{a}.{b}.{c}"))
    }

    pub(super) fn from_str(s: &str) -> anyhow::Result<(Self, String)> {
        let mut words = s.split([' ', '-']);

        let code = words
            .next()
            .and_then(|c| c.parse::<u16>().ok())
            .ok_or_else(|| anyhow::anyhow!("cannot parse {s:?}"))?;

        match words.next().and_then(Self::parse_enhanced) {
            Some(enhanced) => {
                let text_start = 3 + 1 + enhanced.len();
                Ok((
                    Self::Enhanced { code, enhanced },
                    s.get(text_start..).unwrap_or_default().to_string(),
                ))
            }
            None => Ok((
                Self::Code { code },
                s.get(3..).unwrap_or_default().to_string(),
            )),
        }
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code { code } => f.write_fmt(format_args!("{code}")),
            Self::Enhanced { code, enhanced } => f.write_fmt(format_args!("{code} {enhanced}")),
        }
    }
}
