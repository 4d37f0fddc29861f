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

/// A source-address matching rule used by access-control and rate-limit
/// stages.
///
/// Rules are parsed from strings: the keywords `localhost`, `private` and
/// `any`, a literal IPv4/IPv6 address, or a `ADDR/PREFIX` CIDR range.
/// Mixed address families never match each other.
#[derive(Debug, Clone, PartialEq, Eq, serde_with::SerializeDisplay, serde_with::DeserializeFromStr)]
pub enum IpRule {
    /// `127.0.0.0/8` and `::1`.
    Localhost,
    /// RFC1918 ranges and `fc00::/7`.
    Private,
    /// Matches every address.
    Any,
    /// Exact address match.
    Addr(std::net::IpAddr),
    /// IPv4 CIDR range, normalized to its network address.
    Net4(ipnet::Ipv4Net),
    /// IPv6 CIDR range, normalized to its network address.
    Net6(ipnet::Ipv6Net),
}

const PRIVATE_V4: [(std::net::Ipv4Addr, u8); 3] = [
    (std::net::Ipv4Addr::new(10, 0, 0, 0), 8),
    (std::net::Ipv4Addr::new(172, 16, 0, 0), 12),
    (std::net::Ipv4Addr::new(192, 168, 0, 0), 16),
];

impl IpRule {
    /// Does `addr` fall within this rule ?
    #[must_use]
    pub fn matches(&self, addr: std::net::IpAddr) -> bool {
        match (self, addr) {
            (Self::Any, _) => true,
            (Self::Localhost, std::net::IpAddr::V4(ip)) => ip.octets()[0] == 127,
            (Self::Localhost, std::net::IpAddr::V6(ip)) => ip == std::net::Ipv6Addr::LOCALHOST,
            (Self::Private, std::net::IpAddr::V4(ip)) => PRIVATE_V4.iter().any(|(net, prefix)| {
                ipnet::Ipv4Net::new(*net, *prefix)
                    .expect("prefix is valid")
                    .contains(&ip)
            }),
            (Self::Private, std::net::IpAddr::V6(ip)) => {
                ipnet::Ipv6Net::new(std::net::Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7)
                    .expect("prefix is valid")
                    .contains(&ip)
            }
            (Self::Addr(rule), addr) => *rule == addr,
            (Self::Net4(net), std::net::IpAddr::V4(ip)) => net.contains(&ip),
            (Self::Net6(net), std::net::IpAddr::V6(ip)) => net.contains(&ip),
            (Self::Net4(_), std::net::IpAddr::V6(_)) | (Self::Net6(_), std::net::IpAddr::V4(_)) => {
                false
            }
        }
    }
}

impl std::str::FromStr for IpRule {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "localhost" => Ok(Self::Localhost),
            "private" => Ok(Self::Private),
            "any" => Ok(Self::Any),
            addr_or_net => {
                if let Ok(addr) = addr_or_net.parse::<std::net::IpAddr>() {
                    return Ok(Self::Addr(addr));
                }
                if let Ok(net) = addr_or_net.parse::<ipnet::Ipv4Net>() {
                    return Ok(Self::Net4(net.trunc()));
                }
                if let Ok(net) = addr_or_net.parse::<ipnet::Ipv6Net>() {
                    return Ok(Self::Net6(net.trunc()));
                }
                anyhow::bail!("'{s}' is not a valid ip rule")
            }
        }
    }
}

impl std::fmt::Display for IpRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Localhost => f.write_str("localhost"),
            Self::Private => f.write_str("private"),
            Self::Any => f.write_str("any"),
            Self::Addr(addr) => write!(f, "{addr}"),
            Self::Net4(net) => write!(f, "{net}"),
            Self::Net6(net) => write!(f, "{net}"),
        }
    }
}

/// Parse a list of rules leniently: invalid entries are logged and dropped,
/// never applied.
#[must_use]
pub fn parse_rules(raw: &[String]) -> Vec<IpRule> {
    raw.iter()
        .filter_map(|entry| match entry.parse::<IpRule>() {
            Ok(rule) => Some(rule),
            Err(error) => {
                tracing::warn!(%error, "Dropping invalid ip rule.");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {

    use super::*;

    fn ip(s: &str) -> std::net::IpAddr {
        s.parse().unwrap()
    }

    #[rstest::rstest]
    #[case("localhost", "127.0.0.1", true)]
    #[case("localhost", "127.255.0.7", true)]
    #[case("localhost", "::1", true)]
    #[case("localhost", "128.0.0.1", false)]
    #[case("localhost", "::2", false)]
    #[case("private", "10.1.2.3", true)]
    #[case("private", "172.16.0.1", true)]
    #[case("private", "172.32.0.1", false)]
    #[case("private", "192.168.254.254", true)]
    #[case("private", "fc00::1", true)]
    #[case("private", "fe00::1", false)]
    #[case("any", "203.0.113.7", true)]
    #[case("any", "2001:db8::1", true)]
    #[case("192.0.2.1", "192.0.2.1", true)]
    #[case("192.0.2.1", "192.0.2.2", false)]
    #[case("203.0.113.0/24", "203.0.113.7", true)]
    #[case("203.0.113.0/24", "203.0.114.7", false)]
    #[case("2001:db8::/32", "2001:db8:1::1", true)]
    #[case("2001:db8::/32", "2001:db9::1", false)]
    // mixed families never match
    #[case("203.0.113.0/24", "::ffff:203.0.113.7", false)]
    #[case("::1", "127.0.0.1", false)]
    fn matches(#[case] rule: &str, #[case] addr: &str, #[case] expected: bool) {
        assert_eq!(rule.parse::<IpRule>().unwrap().matches(ip(addr)), expected);
    }

    #[test]
    fn network_address_is_normalized() {
        assert_eq!(
            "203.0.113.77/24".parse::<IpRule>().unwrap(),
            "203.0.113.0/24".parse::<IpRule>().unwrap()
        );
    }

    #[rstest::rstest]
    #[case("not-an-ip")]
    #[case("203.0.113.0/33")]
    #[case("2001:db8::/129")]
    #[case("")]
    fn invalid(#[case] rule: &str) {
        assert!(rule.parse::<IpRule>().is_err());
    }

    #[test]
    fn lenient_list() {
        let rules = parse_rules(&[
            "localhost".to_string(),
            "boom".to_string(),
            "10.0.0.0/8".to_string(),
        ]);
        assert_eq!(rules.len(), 2);
    }
}
