/*
 * aliasrelay email alias relay
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
pub fn serialize<S: serde::Serializer>(
    value: &[tracing_subscriber::filter::Directive],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(value.iter().map(ToString::to_string))
}

pub fn deserialize<'de, D>(
    deserializer: D,
) -> Result<Vec<tracing_subscriber::filter::Directive>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    <Vec<String> as serde::Deserialize>::deserialize(deserializer)?
        .into_iter()
        .map(|s| <tracing_subscriber::filter::Directive as std::str::FromStr>::from_str(&s))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| serde::de::Error::custom(format!("invalid directive: `{e}`")))
}

#[cfg(test)]
mod tests {
    #[derive(Debug, serde::Deserialize, serde::Serialize)]
    struct S {
        #[serde(
            serialize_with = "crate::parser::tracing_directive::serialize",
            deserialize_with = "crate::parser::tracing_directive::deserialize"
        )]
        v: Vec<tracing_subscriber::filter::Directive>,
    }

    #[rstest::rstest]
    #[case(r#"{"v":["warn"]}"#)]
    #[case(r#"{"v":["warn","aliasrelay_handler=debug"]}"#)]
    #[case(r#"{"v":[]}"#)]
    fn valid(#[case] input: &str) {
        let parsed = serde_json::from_str::<S>(input).unwrap();
        pretty_assertions::assert_eq!(serde_json::to_string(&parsed).unwrap(), input);
    }

    #[test]
    fn invalid() {
        assert!(serde_json::from_str::<S>(r#"{"v":["aliasrelay=[[["]}"#).is_err());
    }
}
