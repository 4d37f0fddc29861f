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

/// Name of the client sent with the HELO/EHLO command.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ClientName {
    /// Fully qualified domain name.
    Domain(String),
    /// Address literal, IPv4.
    Ip4(std::net::Ipv4Addr),
    /// Address literal, IPv6.
    Ip6(std::net::Ipv6Addr),
}

impl std::fmt::Display for ClientName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Domain(domain) => write!(f, "{domain}"),
            Self::Ip4(ip) => write!(f, "[{ip}]"),
            Self::Ip6(ip) => write!(f, "[IPv6:{ip}]"),
        }
    }
}

impl std::str::FromStr for ClientName {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            ipv6 if ipv6.to_lowercase().starts_with("[ipv6:") && ipv6.ends_with(']') => {
                Ok(Self::Ip6(ipv6["[IPv6:".len()..ipv6.len() - 1].parse()?))
            }
            ipv4 if ipv4.starts_with('[') && ipv4.ends_with(']') => {
                Ok(Self::Ip4(ipv4[1..ipv4.len() - 1].parse()?))
            }
            domain => Ok(Self::Domain(
                addr::parse_domain_name(domain)
                    .map_err(|error| anyhow::anyhow!("invalid client name: {error}"))?
                    .to_string(),
            )),
        }
    }
}
