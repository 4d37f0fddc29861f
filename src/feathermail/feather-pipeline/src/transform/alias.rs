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
use feather_common::{Address, Meta};

type AliasMap = std::collections::BTreeMap<String, Vec<String>>;

/// Expand one recipient through `aliases`.
///
/// Keys are local parts; a target without `@` stays on the recipient's
/// domain. Expansion recurses up to `max_depth`; a cycle or the depth
/// bound leaves the address as it stands at that point.
fn expand_one(
    rcpt: &Address,
    aliases: &AliasMap,
    max_depth: usize,
    seen: &mut std::collections::BTreeSet<String>,
    out: &mut Vec<Address>,
) {
    if max_depth == 0 || !seen.insert(rcpt.full().to_lowercase()) {
        tracing::warn!(rcpt = %rcpt, "Alias expansion cycle or depth bound reached.");
        out.push(rcpt.clone());
        return;
    }

    match aliases.get(rcpt.local_part()) {
        None => out.push(rcpt.clone()),
        Some(targets) => {
            for target in targets {
                let target = if target.contains('@') {
                    target.clone()
                } else {
                    format!("{target}@{}", rcpt.domain())
                };
                match target.parse::<Address>() {
                    Ok(target) => expand_one(&target, aliases, max_depth - 1, seen, out),
                    Err(error) => {
                        tracing::warn!(%error, "Dropping invalid alias target.");
                    }
                }
            }
        }
    }
}

/// Expand every recipient of `meta.to`, deduplicating while keeping the
/// first-seen order.
pub fn expand_aliases(meta: &mut Meta, aliases: &AliasMap, max_depth: usize) {
    let mut expanded = vec![];
    for rcpt in &meta.to {
        let mut seen = std::collections::BTreeSet::new();
        expand_one(rcpt, aliases, max_depth, &mut seen, &mut expanded);
    }

    let mut unique = std::collections::BTreeSet::new();
    meta.to = expanded
        .into_iter()
        .filter(|rcpt| unique.insert(rcpt.full().to_lowercase()))
        .collect();
}

/// Parse an `/etc/aliases`-format document: `alias: target1, target2`,
/// `#` comments, leading-whitespace continuation lines.
#[must_use]
pub fn parse_alias_file(content: &str) -> AliasMap {
    let mut unfolded: Vec<String> = vec![];
    for line in content.lines() {
        if line.trim_start().starts_with('#') || line.trim().is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some(last) = unfolded.last_mut() {
                last.push(' ');
                last.push_str(line.trim());
                continue;
            }
        }
        unfolded.push(line.trim().to_string());
    }

    let mut aliases = AliasMap::new();
    for line in unfolded {
        let Some((alias, targets)) = line.split_once(':') else {
            tracing::warn!(line, "Ignoring alias line without ':'.");
            continue;
        };
        let targets = targets
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        if targets.is_empty() {
            tracing::warn!(alias, "Ignoring alias without targets.");
            continue;
        }
        aliases.insert(alias.trim().to_string(), targets);
    }
    aliases
}

/// Alias expansion from an inline table.
#[derive(Debug)]
pub struct AliasResolver {
    aliases: AliasMap,
    max_depth: usize,
}

impl AliasResolver {
    ///
    #[must_use]
    pub fn new(aliases: AliasMap, max_depth: usize) -> Self {
        Self { aliases, max_depth }
    }
}

impl Transformer for AliasResolver {
    fn kind(&self) -> &'static str {
        "alias_resolver"
    }

    fn transform_meta(&mut self, meta: &mut Meta) -> anyhow::Result<()> {
        expand_aliases(meta, &self.aliases, self.max_depth);
        Ok(())
    }
}

/// Alias expansion from a file, cached for `reload_interval`.
/// A missing file is tolerated and treated as empty.
#[derive(Debug)]
pub struct FileAliasResolver {
    path: std::path::PathBuf,
    reload_interval: std::time::Duration,
    max_depth: usize,
    cache: AliasMap,
    loaded_at: Option<std::time::Instant>,
}

impl FileAliasResolver {
    ///
    #[must_use]
    pub fn new(
        path: std::path::PathBuf,
        reload_interval: std::time::Duration,
        max_depth: usize,
    ) -> Self {
        Self {
            path,
            reload_interval,
            max_depth,
            cache: AliasMap::new(),
            loaded_at: None,
        }
    }

    fn refresh(&mut self) {
        let stale = self
            .loaded_at
            .map_or(true, |loaded| loaded.elapsed() >= self.reload_interval);
        if !stale {
            return;
        }

        self.cache = match std::fs::read_to_string(&self.path) {
            Ok(content) => parse_alias_file(&content),
            Err(error) => {
                tracing::warn!(path = %self.path.display(), %error, "Alias file unreadable, treating as empty.");
                AliasMap::new()
            }
        };
        self.loaded_at = Some(std::time::Instant::now());
    }
}

impl Transformer for FileAliasResolver {
    fn kind(&self) -> &'static str {
        "file_alias_resolver"
    }

    fn transform_meta(&mut self, meta: &mut Meta) -> anyhow::Result<()> {
        self.refresh();
        expand_aliases(meta, &self.cache, self.max_depth);
        Ok(())
    }
}
