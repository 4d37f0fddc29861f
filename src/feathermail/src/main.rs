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

use feathermail::{process, Args, Commands};
use feather_config::Config;
use feather_server::{socket_bind_anyhow, start_runtime};

fn main() {
    if let Err(err) = try_main() {
        let error = format!("feathermail terminating error: '{err}'");

        eprintln!("{error}");
        tracing::error!(error);
        err.chain().skip(1).for_each(|cause| {
            let reason = format!("because: {cause}");

            eprintln!("{reason}");
            tracing::error!(reason);
        });
        std::process::exit(1);
    }
}

fn load_config() -> anyhow::Result<Config> {
    let path = feather_config::server_config_path();
    if !path.exists() {
        tracing::warn!(path = %path.display(), "No server configuration, using the defaults.");
        return Config::from_toml(&format!(
            "version_requirement = \">={}\"",
            env!("CARGO_PKG_VERSION")
        ));
    }

    let content = std::fs::read_to_string(&path)
        .map_err(|e| anyhow::anyhow!("Cannot read file '{}': {e}", path.display()))?;
    Config::from_toml(&content)
        .map_err(|e| anyhow::anyhow!("Cannot parse the configuration: {e}"))
}

fn try_main() -> anyhow::Result<()> {
    let args = <Args as clap::Parser>::parse();

    if let Some(folder) = &args.config {
        std::env::set_var(feather_config::ENV_CONFIG_FOLDER, folder);
    }

    let config = load_config()?;
    let command = args.command.unwrap_or(Commands::Start);

    match command {
        Commands::ConfigShow => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            return Ok(());
        }
        Commands::Stop => {
            process::stop_daemon()?;
            println!("feathermail stopped");
            return Ok(());
        }
        Commands::Start | Commands::Daemon => {}
    }

    feathermail::tracing_subscriber::initialize(&config)?;

    tracing::info!(
        domain = config.server.domain,
        address = %config.server.address,
        port = config.server.port,
        "FeatherMail starting.",
    );

    let listener = socket_bind_anyhow((config.server.address, config.server.port))?;

    if command == Commands::Daemon {
        process::daemon(false, false)?;
    }
    process::write_pid_file()?;

    let result = start_runtime(config, listener, args.timeout.map(|t| *t));
    process::remove_pid_file();
    result
}
