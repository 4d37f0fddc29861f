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

use crate::Server;
use feather_config::Config;
use feather_pipeline::{
    spawn_pipeline_watcher, spawn_server_config_watcher, PipelineHandle, PipelineSpec,
};

/// How often the configuration documents are polled for changes.
const CONFIG_POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(2);

/// Load the pipeline document; a missing file is an empty pipeline, an
/// invalid one is fatal at boot.
fn load_pipeline(path: &std::path::Path) -> anyhow::Result<PipelineSpec> {
    if !path.exists() {
        tracing::warn!(path = %path.display(), "No pipeline document, starting with an empty pipeline.");
        return Ok(PipelineSpec::default());
    }

    PipelineSpec::from_toml(&std::fs::read_to_string(path)?)
        .map_err(|error| anyhow::anyhow!("invalid pipeline '{}': {error}", path.display()))
}

/// Start the FeatherMail runtime: the TTL-store sweeper, the
/// configuration watchers and the listener; runs until SIGTERM/SIGINT
/// (or `timeout`, used by tests).
///
/// # Errors
///
/// * invalid pipeline document, unusable TLS material, or listener failure
pub fn start_runtime(
    config: Config,
    listener: std::net::TcpListener,
    timeout: Option<std::time::Duration>,
) -> anyhow::Result<()> {
    let config = std::sync::Arc::new(config);

    let pipeline_path = feather_config::pipeline_config_path();
    let pipeline = PipelineHandle::new(load_pipeline(&pipeline_path)?);

    let store = std::sync::Arc::new(feather_store::TtlStore::new());

    let (shutdown_sender, mut shutdown_receiver) = tokio::sync::mpsc::channel::<()>(3);
    let mut signals = signal_hook::iterator::Signals::new([
        // sent by `systemctl stop` and by the `stop` subcommand
        signal_hook::consts::SIGTERM,
        // Ctrl+C on a terminal
        signal_hook::consts::SIGINT,
    ])?;
    let _signal_handler = std::thread::spawn({
        let shutdown_sender = shutdown_sender.clone();
        move || {
            for signal in signals.forever() {
                tracing::warn!(signal, "Stopping FeatherMail server.");
                if shutdown_sender.blocking_send(()).is_err() {
                    return;
                }
            }
        }
    });

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("feather-receiver")
        .build()?;

    runtime.block_on(async move {
        let _sweeper = store.spawn_sweeper(config.server.store.sweep_interval);
        let _pipeline_watcher =
            spawn_pipeline_watcher(pipeline.clone(), pipeline_path, CONFIG_POLL_INTERVAL);
        let _config_watcher = spawn_server_config_watcher(
            feather_config::server_config_path(),
            CONFIG_POLL_INTERVAL,
        );

        let server = Server::new(config, pipeline, store)?;
        let serve = server.listen_and_serve(listener);
        tokio::pin!(serve);

        let deadline = async {
            match timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            result = &mut serve => result,
            _ = shutdown_receiver.recv() => {
                tracing::info!("Shutdown requested.");
                Ok(())
            }
            () = deadline => Ok(()),
        }
    })
}
