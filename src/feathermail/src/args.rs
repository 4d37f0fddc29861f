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

/// FeatherMail pluggable SMTP server.
#[derive(Debug, clap::Parser)]
#[clap(about, version, author)]
pub struct Args {
    /// Configuration folder, overriding `$FEATHER_CONFIG_FOLDER` and the
    /// OS default.
    #[clap(short, long)]
    pub config: Option<std::path::PathBuf>,

    /// Stop the server automatically after this delay (mostly for tests).
    #[clap(short, long)]
    pub timeout: Option<humantime::Duration>,

    /// What to do; `start` when omitted.
    #[clap(subcommand)]
    pub command: Option<Commands>,
}

/// The commands of the server binary.
#[derive(Debug, Copy, Clone, PartialEq, Eq, clap::Subcommand)]
pub enum Commands {
    /// Run in the foreground.
    Start,
    /// Detach and run as a daemon.
    Daemon,
    /// Stop a running daemon through its pid file.
    Stop,
    /// Print the resolved configuration and exit.
    ConfigShow,
}
