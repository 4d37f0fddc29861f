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

use crate::{DeliveryError, Transport};
use feather_common::{Address, Meta};

/// Writes one file per recipient under
/// `<dirpath>/<local part>/<unix ts>-<rand>.eml`.
#[derive(Debug)]
pub struct LocalFile {
    dirpath: std::path::PathBuf,
}

impl LocalFile {
    ///
    #[must_use]
    pub fn new(dirpath: std::path::PathBuf) -> Self {
        Self { dirpath }
    }

    fn unique_name() -> String {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        format!("{ts}-{:08x}.eml", rand::random::<u32>())
    }
}

#[async_trait::async_trait]
impl Transport for LocalFile {
    #[tracing::instrument(name = "local-file", skip_all)]
    async fn deliver(
        &self,
        _meta: &Meta,
        to: &[Address],
        content: &[u8],
    ) -> Result<(), DeliveryError> {
        for rcpt in to {
            let mailbox = self.dirpath.join(rcpt.local_part());
            tokio::fs::create_dir_all(&mailbox)
                .await
                .map_err(|error| DeliveryError::Transient(error.to_string()))?;

            let filepath = mailbox.join(Self::unique_name());
            tokio::fs::write(&filepath, content)
                .await
                .map_err(|error| DeliveryError::Transient(error.to_string()))?;

            tracing::info!(rcpt = %rcpt, filepath = %filepath.display(), "Email delivered.");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {

    use super::*;
    use feather_common::addr;

    #[tokio::test]
    async fn one_file_per_recipient() {
        let dirpath = std::env::temp_dir().join(format!(
            "feather-local-file-{:08x}",
            rand::random::<u32>()
        ));
        let transport = LocalFile::new(dirpath.clone());

        let meta = Meta::new("192.0.2.1".parse().unwrap());
        transport
            .deliver(
                &meta,
                &[addr!("bob@elsewhere.com"), addr!("carol@elsewhere.com")],
                b"Subject: hi\r\n\r\nhi\r\n",
            )
            .await
            .unwrap();

        for mailbox in ["bob", "carol"] {
            let entries = std::fs::read_dir(dirpath.join(mailbox))
                .unwrap()
                .collect::<Result<Vec<_>, _>>()
                .unwrap();
            assert_eq!(entries.len(), 1);

            let content = std::fs::read(entries[0].path()).unwrap();
            assert_eq!(content, b"Subject: hi\r\n\r\nhi\r\n");
            assert!(entries[0]
                .file_name()
                .to_str()
                .unwrap()
                .ends_with(".eml"));
        }

        std::fs::remove_dir_all(&dirpath).unwrap();
    }
}
