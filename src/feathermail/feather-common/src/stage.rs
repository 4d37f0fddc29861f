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

/// Progress of the SMTP transaction, used to gate which verbs are legal.
#[derive(
    Debug,
    Eq,
    PartialEq,
    Hash,
    Copy,
    Clone,
    Ord,
    PartialOrd,
    serde_with::DeserializeFromStr,
    serde_with::SerializeDisplay,
    strum::EnumString,
    strum::Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum Stage {
    /// After the TCP/IP socket has been accepted
    Connect,
    /// After receiving the HELO/EHLO command
    Helo,
    /// After receiving the MAIL FROM command
    #[strum(serialize = "mail")]
    MailFrom,
    /// After receiving the RCPT TO command
    #[strum(serialize = "rcpt")]
    RcptTo,
}

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn string_round_trip() {
        for (stage, repr) in [
            (Stage::Connect, "connect"),
            (Stage::Helo, "helo"),
            (Stage::MailFrom, "mail"),
            (Stage::RcptTo, "rcpt"),
        ] {
            assert_eq!(stage.to_string(), repr);
            assert_eq!(repr.parse::<Stage>().unwrap(), stage);
        }
    }
}
