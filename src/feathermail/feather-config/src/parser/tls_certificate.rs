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

pub fn from_path(path: &std::path::Path) -> anyhow::Result<Vec<rustls::Certificate>> {
    anyhow::ensure!(
        path.exists(),
        format!("certificate path does not exist: '{}'", path.display())
    );
    from_string(&std::fs::read_to_string(path)?)
}

pub fn from_string(input: &str) -> anyhow::Result<Vec<rustls::Certificate>> {
    let mut reader = std::io::BufReader::new(input.as_bytes());

    let pem = rustls_pemfile::certs(&mut reader)?
        .into_iter()
        .map(rustls::Certificate)
        .collect::<Vec<_>>();

    anyhow::ensure!(!pem.is_empty(), "certificate file is valid but empty");
    Ok(pem)
}
