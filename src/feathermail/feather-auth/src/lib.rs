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

//! FeatherMail authentication & signing primitives
//!
//! The cryptographic leaves used by the pipeline stages: the AES-256-GCM
//! password envelope of `provisioned_auth`, the bcrypt keystore, the SRS
//! sender-rewriting scheme and DKIM message signing.

#![doc(html_no_source)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod dkim;
mod envelope;
mod keystore;
mod srs;

pub use dkim::{DkimParams, DkimSigner};
pub use envelope::{decrypt_password, EnvelopeError};
pub use keystore::{Keystore, KeystoreEntry};
pub use srs::{Srs, SrsAddress, SrsError};
