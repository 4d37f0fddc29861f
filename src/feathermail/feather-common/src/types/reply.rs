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

use crate::ReplyCode;

/// SMTP message sent by the server to the client as defined in RFC5321#4.2
#[derive(Debug, Clone, PartialEq, Eq, serde_with::SerializeDisplay, serde_with::DeserializeFromStr)]
pub struct Reply {
    code: ReplyCode,
    text: String,
}

impl Reply {
    ///
    pub fn new(code: ReplyCode, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    ///
    #[must_use]
    pub const fn code(&self) -> &ReplyCode {
        &self.code
    }

    ///
    #[must_use]
    pub const fn text(&self) -> &String {
        &self.text
    }

    /// Produce the wire representation, one `code [enhanced] text\r\n` per
    /// line of `text`, with the continuation separator on all but the last.
    #[must_use]
    pub fn fold(&self) -> String {
        let lines = self
            .text
            .split("\r\n")
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        let last = lines.len().saturating_sub(1);
        lines
            .into_iter()
            .enumerate()
            .map(|(i, line)| {
                let sep = if i == last { ' ' } else { '-' };
                match &self.code {
                    ReplyCode::Code { code } => format!("{code}{sep}{line}\r\n"),
                    ReplyCode::Enhanced { code, enhanced } => {
                        format!("{code}{sep}{enhanced} {line}\r\n")
                    }
                }
            })
            .collect::<String>()
    }

    /// Prepend the lines of `informational` to `response`, keeping the
    /// response's code.
    #[must_use]
    pub fn combine(informational: &Self, response: &Self) -> Self {
        Self {
            code: response.code.clone(),
            text: format!("{}\r\n{}", informational.text, response.text),
        }
    }
}

impl std::str::FromStr for Reply {
    type Err = anyhow::Error;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let (code, text) = ReplyCode::from_str(line.trim_end_matches("\r\n"))?;
        Ok(Self::new(code, text.trim_start().to_string()))
    }
}

impl std::fmt::Display for Reply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.fold().trim_end_matches("\r\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_line() {
        let output = Reply::new(ReplyCode::Code { code: 220 }, "this is a custom code.").fold();
        pretty_assertions::assert_eq!(output, "220 this is a custom code.\r\n".to_string());
    }

    #[test]
    fn one_line_enhanced() {
        let output = Reply::new(
            ReplyCode::Enhanced {
                code: 250,
                enhanced: "2.0.0".to_string(),
            },
            "OK: message accepted",
        )
        .fold();
        pretty_assertions::assert_eq!(output, "250 2.0.0 OK: message accepted\r\n".to_string());
    }

    #[test]
    fn ehlo_response() {
        let output = Reply::new(
            ReplyCode::Code { code: 250 },
            [
                "testserver.com\r\n",
                "AUTH PLAIN LOGIN\r\n",
                "8BITMIME\r\n",
                "SMTPUTF8\r\n",
            ]
            .concat(),
        )
        .fold();
        pretty_assertions::assert_eq!(
            output,
            [
                "250-testserver.com\r\n",
                "250-AUTH PLAIN LOGIN\r\n",
                "250-8BITMIME\r\n",
                "250 SMTPUTF8\r\n",
            ]
            .concat()
        );
    }

    #[rstest::rstest]
    #[case("250 Ok", ReplyCode::Code { code: 250 }, "Ok")]
    #[case("250 ", ReplyCode::Code { code: 250 }, "")]
    #[case(
        "501 5.1.7 Invalid address",
        ReplyCode::Enhanced { code: 501, enhanced: "5.1.7".to_string() },
        "Invalid address"
    )]
    fn parse(#[case] input: &str, #[case] code: ReplyCode, #[case] text: &str) {
        let reply = input.parse::<Reply>().unwrap();
        pretty_assertions::assert_eq!(*reply.code(), code);
        pretty_assertions::assert_eq!(reply.text(), text);
    }

    #[test]
    fn combine() {
        assert_eq!(
            Reply::combine(
                &Reply::new(
                    ReplyCode::Code { code: 451 },
                    "TLS not available due to temporary reason"
                ),
                &Reply::new(
                    ReplyCode::Code { code: 451 },
                    "Too many errors from the client"
                ),
            )
            .fold(),
            [
                "451-TLS not available due to temporary reason\r\n",
                "451 Too many errors from the client\r\n"
            ]
            .concat()
        );
    }
}
