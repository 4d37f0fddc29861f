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

use crate::PipelineSpec;
use sha2::{Digest, Sha256};

/// Shared handle on the current pipeline.
///
/// Readers take a full snapshot ([`PipelineHandle::snapshot`]) at accept
/// time and keep it for the session's lifetime; the watcher replaces the
/// value atomically. A missing pipeline document is an empty pipeline.
#[derive(Clone)]
pub struct PipelineHandle {
    inner: std::sync::Arc<arc_swap::ArcSwap<PipelineSpec>>,
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("stages", &self.snapshot().stages.len())
            .finish()
    }
}

impl PipelineHandle {
    /// Wrap an initial spec.
    #[must_use]
    pub fn new(spec: PipelineSpec) -> Self {
        Self {
            inner: std::sync::Arc::new(arc_swap::ArcSwap::from_pointee(spec)),
        }
    }

    /// The current spec; sessions hold this `Arc` for their lifetime.
    #[must_use]
    pub fn snapshot(&self) -> std::sync::Arc<PipelineSpec> {
        self.inner.load_full()
    }

    /// Atomically publish a new spec for subsequent sessions.
    pub fn update(&self, spec: PipelineSpec) {
        self.inner.store(std::sync::Arc::new(spec));
    }
}

fn content_hash(path: &std::path::Path) -> Option<[u8; 32]> {
    std::fs::read(path)
        .ok()
        .map(|content| Sha256::digest(content).into())
}

/// Watch the pipeline document and swap the handle on change.
///
/// The file is polled by content hash. A change that fails to parse or
/// validate keeps the old spec and logs the error.
pub fn spawn_pipeline_watcher(
    handle: PipelineHandle,
    path: std::path::PathBuf,
    poll_interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut current = content_hash(&path);

        loop {
            tokio::time::sleep(poll_interval).await;

            let fresh = content_hash(&path);
            if fresh == current {
                continue;
            }
            current = fresh;

            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(error) => {
                    tracing::error!(path = %path.display(), %error, "Pipeline file unreadable, keeping the current pipeline.");
                    continue;
                }
            };

            match PipelineSpec::from_toml(&content) {
                Ok(spec) => {
                    tracing::info!(
                        path = %path.display(),
                        stages = spec.stages.len(),
                        "Pipeline reloaded; running sessions keep their spec."
                    );
                    handle.update(spec);
                }
                Err(error) => {
                    tracing::error!(path = %path.display(), %error, "Invalid pipeline, keeping the current one.");
                }
            }
        }
    })
}

/// Watch the server configuration document; changes are **not** applied
/// live, only announced.
pub fn spawn_server_config_watcher(
    path: std::path::PathBuf,
    poll_interval: std::time::Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut current = content_hash(&path);

        loop {
            tokio::time::sleep(poll_interval).await;

            let fresh = content_hash(&path);
            if fresh != current {
                current = fresh;
                tracing::warn!(
                    path = %path.display(),
                    "Server configuration changed, restart required."
                );
            }
        }
    })
}
