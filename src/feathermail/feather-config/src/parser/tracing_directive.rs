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

use tracing_subscriber::filter::Directive;

pub fn serialize<S: serde::Serializer>(
    value: &[Directive],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(value.iter().map(ToString::to_string))
}

pub fn deserialize<'de, D: serde::Deserializer<'de>>(
    deserializer: D,
) -> Result<Vec<Directive>, D::Error> {
    <Vec<String> as serde::Deserialize>::deserialize(deserializer)?
        .into_iter()
        .map(|directive| directive.parse().map_err(serde::de::Error::custom))
        .collect()
}

#[cfg(test)]
mod tests {

    #[derive(Debug, serde::Serialize, serde::Deserialize)]
    struct S {
        #[serde(
            serialize_with = "super::serialize",
            deserialize_with = "super::deserialize"
        )]
        v: Vec<tracing_subscriber::filter::Directive>,
    }

    #[test]
    fn round_trip() {
        let parsed = serde_json::from_str::<S>(r#"{"v": ["info", "feather_server=debug"]}"#)
            .unwrap();
        assert_eq!(
            serde_json::to_string(&parsed).unwrap(),
            r#"{"v":["info","feather_server=debug"]}"#
        );
    }

    #[test]
    fn invalid_directive() {
        assert!(serde_json::from_str::<S>(r#"{"v": ["=!="]}"#).is_err());
    }
}
