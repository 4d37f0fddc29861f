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

/// The credentials sent by the client, not necessarily valid ones.
///
/// The `Debug` implementation redacts the password so credentials can be
/// traced without leaking secrets.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Authentication identity.
    pub authid: String,
    /// Password (or encrypted password envelope).
    pub authpass: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("authid", &self.authid)
            .field("authpass", &"***")
            .finish()
    }
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn password_is_redacted() {
        let credentials = Credentials {
            authid: "alice".to_string(),
            authpass: "hunter2".to_string(),
        };
        let debugged = format!("{credentials:?}");
        assert!(debugged.contains("alice"));
        assert!(!debugged.contains("hunter2"));
    }
}
