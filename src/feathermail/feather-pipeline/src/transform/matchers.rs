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
use feather_common::Meta;

type CompiledRules = Vec<(regex::Regex, String)>;

fn first_match(rules: &CompiledRules, haystack: &str) -> Option<String> {
    rules
        .iter()
        .find(|(pattern, _)| pattern.is_match(haystack))
        .map(|(_, mailbox)| mailbox.clone())
}

/// Split the raw message in `(header block, body)` at the empty line.
fn split_raw(raw: &[u8]) -> (String, String) {
    let text = String::from_utf8_lossy(raw);
    match text.split_once("\r\n\r\n") {
        Some((headers, body)) => (headers.to_string(), body.to_string()),
        None => (text.to_string(), String::new()),
    }
}

/// First rule matching the envelope sender assigns `meta.mailbox`.
#[derive(Debug)]
pub struct MatchSender {
    rules: CompiledRules,
}

impl MatchSender {
    ///
    #[must_use]
    pub fn new(rules: CompiledRules) -> Self {
        Self { rules }
    }
}

impl Transformer for MatchSender {
    fn kind(&self) -> &'static str {
        "match_sender"
    }

    fn transform_meta(&mut self, meta: &mut Meta) -> anyhow::Result<()> {
        let from = meta.from.as_ref().map_or_else(String::new, |f| f.full().to_string());
        if let Some(mailbox) = first_match(&self.rules, &from) {
            meta.mailbox = Some(mailbox);
        }
        Ok(())
    }
}

/// First rule matching any envelope recipient assigns `meta.mailbox`.
#[derive(Debug)]
pub struct MatchRcptTo {
    rules: CompiledRules,
}

impl MatchRcptTo {
    ///
    #[must_use]
    pub fn new(rules: CompiledRules) -> Self {
        Self { rules }
    }
}

impl Transformer for MatchRcptTo {
    fn kind(&self) -> &'static str {
        "match_rcpt_to"
    }

    fn transform_meta(&mut self, meta: &mut Meta) -> anyhow::Result<()> {
        let matched = meta
            .to
            .iter()
            .find_map(|rcpt| first_match(&self.rules, rcpt.full()));
        if let Some(mailbox) = matched {
            meta.mailbox = Some(mailbox);
        }
        Ok(())
    }
}

/// First rule matching a header line assigns `meta.mailbox`.
#[derive(Debug)]
pub struct MatchHeader {
    rules: CompiledRules,
}

impl MatchHeader {
    ///
    #[must_use]
    pub fn new(rules: CompiledRules) -> Self {
        Self { rules }
    }
}

impl Transformer for MatchHeader {
    fn kind(&self) -> &'static str {
        "match_header"
    }

    fn transform_data(&mut self, raw: &mut Vec<u8>, meta: &mut Meta) -> anyhow::Result<()> {
        let (headers, _) = split_raw(raw);
        let matched = headers
            .split("\r\n")
            .find_map(|line| first_match(&self.rules, line));
        if let Some(mailbox) = matched {
            meta.mailbox = Some(mailbox);
        }
        Ok(())
    }
}

/// First rule matching a body line assigns `meta.mailbox`.
#[derive(Debug)]
pub struct MatchBody {
    rules: CompiledRules,
}

impl MatchBody {
    ///
    #[must_use]
    pub fn new(rules: CompiledRules) -> Self {
        Self { rules }
    }
}

impl Transformer for MatchBody {
    fn kind(&self) -> &'static str {
        "match_body"
    }

    fn transform_data(&mut self, raw: &mut Vec<u8>, meta: &mut Meta) -> anyhow::Result<()> {
        let (_, body) = split_raw(raw);
        let matched = body
            .split("\r\n")
            .find_map(|line| first_match(&self.rules, line));
        if let Some(mailbox) = matched {
            meta.mailbox = Some(mailbox);
        }
        Ok(())
    }
}

/// Assigns `meta.mailbox` when every matcher before left it unset.
#[derive(Debug)]
pub struct DefaultMailbox {
    mailbox: String,
}

impl DefaultMailbox {
    ///
    #[must_use]
    pub fn new(mailbox: String) -> Self {
        Self { mailbox }
    }
}

impl Transformer for DefaultMailbox {
    fn kind(&self) -> &'static str {
        "default_mailbox"
    }

    fn transform_meta(&mut self, meta: &mut Meta) -> anyhow::Result<()> {
        if meta.mailbox.is_none() {
            meta.mailbox = Some(self.mailbox.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use feather_common::addr;

    fn rules(entries: &[(&str, &str)]) -> CompiledRules {
        entries
            .iter()
            .map(|(pattern, mailbox)| {
                (regex::Regex::new(pattern).unwrap(), mailbox.to_string())
            })
            .collect()
    }

    fn meta() -> Meta {
        let mut meta = Meta::new("192.0.2.1".parse().unwrap());
        meta.from = Some(addr!("newsletter@shop.example"));
        meta.to = vec![addr!("alice+invoices@example.com")];
        meta
    }

    #[test]
    fn sender_first_rule_wins() {
        let mut meta = meta();
        MatchSender::new(rules(&[
            ("newsletter@", "bulk"),
            (".*", "catchall"),
        ]))
        .transform_meta(&mut meta)
        .unwrap();
        assert_eq!(meta.mailbox.as_deref(), Some("bulk"));
    }

    #[test]
    fn rcpt_match() {
        let mut meta = meta();
        MatchRcptTo::new(rules(&[(r"\+invoices@", "invoices")]))
            .transform_meta(&mut meta)
            .unwrap();
        assert_eq!(meta.mailbox.as_deref(), Some("invoices"));
    }

    #[test]
    fn no_match_leaves_mailbox_unset() {
        let mut meta = meta();
        MatchSender::new(rules(&[("@nowhere$", "x")]))
            .transform_meta(&mut meta)
            .unwrap();
        assert_eq!(meta.mailbox, None);
    }

    #[test]
    fn header_and_body() {
        let raw = b"Subject: [SPAM] buy things\r\nList-Id: <x>\r\n\r\nunsubscribe here\r\n".to_vec();

        let mut meta = meta();
        MatchHeader::new(rules(&[(r"^Subject: \[SPAM\]", "junk")]))
            .transform_data(&mut raw.clone(), &mut meta)
            .unwrap();
        assert_eq!(meta.mailbox.as_deref(), Some("junk"));

        let mut meta = self::meta();
        MatchBody::new(rules(&[("unsubscribe", "bulk")]))
            .transform_data(&mut raw.clone(), &mut meta)
            .unwrap();
        assert_eq!(meta.mailbox.as_deref(), Some("bulk"));
    }

    #[test]
    fn default_only_when_unset() {
        let mut meta = meta();
        DefaultMailbox::new("inbox".to_string())
            .transform_meta(&mut meta)
            .unwrap();
        assert_eq!(meta.mailbox.as_deref(), Some("inbox"));

        DefaultMailbox::new("other".to_string())
            .transform_meta(&mut meta)
            .unwrap();
        assert_eq!(meta.mailbox.as_deref(), Some("inbox"));
    }
}
