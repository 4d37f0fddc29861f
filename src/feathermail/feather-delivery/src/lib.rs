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

//! FeatherMail delivery transports
//!
//! The [`Transport`] trait is the seam between the routing stage and the
//! outside world. The concrete transports here are deliberately thin:
//! local files for testing and single-host SMTP forwarding. Anything
//! heavier (MX resolution, LMTP, LDA) plugs in behind the same trait.

#![doc(html_no_source)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod forward;
mod local_file;
mod transport;

pub use forward::Forward;
pub use local_file::LocalFile;
pub use transport::{DeliveryConfig, DeliveryError, Transport};
