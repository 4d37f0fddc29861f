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

/// One provisioned account.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct KeystoreEntry {
    /// bcrypt hash of the account password.
    pub hashed_password: String,
    /// Provisioning date, ISO-8601.
    pub created_at: String,
}

/// The provisioned account store: a JSON file mapping
/// `username → {hashed_password, created_at}`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Keystore {
    entries: std::collections::BTreeMap<String, KeystoreEntry>,
}

impl Keystore {
    /// Load the keystore from `path`. A missing file is tolerated and
    /// yields an empty keystore.
    ///
    /// # Errors
    ///
    /// * the file exists but is not a valid keystore document
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Keystore not found, starting empty.");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)?;
        Ok(Self {
            entries: serde_json::from_str(&content)?,
        })
    }

    /// Build a keystore from in-memory entries.
    #[must_use]
    pub fn from_entries(entries: std::collections::BTreeMap<String, KeystoreEntry>) -> Self {
        Self { entries }
    }

    /// Verify `password` against the bcrypt hash stored for `username`.
    /// Unknown users verify as `false`.
    #[must_use]
    pub fn verify(&self, username: &str, password: &str) -> bool {
        self.entries
            .get(username)
            .map_or(false, |entry| {
                pwhash::bcrypt::verify(password, &entry.hashed_password)
            })
    }

    /// Number of provisioned accounts.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Is the keystore empty ?
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
