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

/// The configuration used by the protocol tests: small limits, no TLS,
/// a stable domain for transcript assertions.
#[must_use]
pub fn local_test() -> Config {
    Config::from_toml(
        r#"
version_requirement = ">=0.1.0"

[server]
name = "feathermail"
domain = "testserver.com"
address = "127.0.0.1"
port = 0

[server.session_options]
tls = "never"
max_message_size = 1000000

[server.smtp.error]
soft_count = -1
hard_count = -1
delay = "0s"
"#,
    )
    .expect("test configuration is well formed")
}
