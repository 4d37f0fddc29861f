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

use feather_config::Config;
use tracing_subscriber::filter::EnvFilter;

/// Install the global `tracing` subscriber from the configuration's
/// level directives.
///
/// # Errors
///
/// * a subscriber is already installed
pub fn initialize(config: &Config) -> anyhow::Result<()> {
    let mut filter = EnvFilter::default();
    for directive in &config.server.logs.level {
        filter = filter.add_directive(directive.clone());
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("cannot initialize the logs: {e}"))
}
