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

pub fn from_path(path: &std::path::Path) -> anyhow::Result<rustls::PrivateKey> {
    anyhow::ensure!(
        path.exists(),
        format!("private key path does not exist: '{}'", path.display())
    );
    from_string(&std::fs::read_to_string(path)?)
}

pub fn from_string(input: &str) -> anyhow::Result<rustls::PrivateKey> {
    let mut reader = std::io::BufReader::new(input.as_bytes());

    loop {
        match rustls_pemfile::read_one(&mut reader)? {
            Some(
                rustls_pemfile::Item::RSAKey(key)
                | rustls_pemfile::Item::PKCS8Key(key)
                | rustls_pemfile::Item::ECKey(key),
            ) => return Ok(rustls::PrivateKey(key)),
            Some(_) => continue,
            None => anyhow::bail!("private key file contains no usable key"),
        }
    }
}
