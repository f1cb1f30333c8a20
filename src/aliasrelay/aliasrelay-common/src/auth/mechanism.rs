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
/// SASL mechanisms accepted on the submission listener.
/// See <https://www.iana.org/assignments/sasl-mechanisms/sasl-mechanisms.xhtml>
#[derive(
    Debug,
    PartialEq,
    Eq,
    Copy,
    Clone,
    Hash,
    PartialOrd,
    Ord,
    strum::EnumIter,
    strum::Display,
    strum::EnumString,
    serde_with::SerializeDisplay,
    serde_with::DeserializeFromStr,
)]
#[strum(serialize_all = "SCREAMING-KEBAB-CASE")]
pub enum Mechanism {
    /// `authzid\0authcid\0passwd` in a single base64 response, see RFC4616
    Plain,
    /// Username and password in two separate challenges
    Login,
}

impl Mechanism {
    /// Does the client start the exchange with an initial response.
    #[must_use]
    pub const fn client_first(self) -> bool {
        matches!(self, Self::Plain)
    }
}

#[cfg(test)]
mod tests {
    use super::Mechanism;

    #[rstest::rstest]
    #[case("PLAIN", Some(Mechanism::Plain))]
    #[case("LOGIN", Some(Mechanism::Login))]
    #[case("CRAM-MD5", None)]
    #[case("XOAUTH2", None)]
    fn parse(#[case] input: &str, #[case] expected: Option<Mechanism>) {
        assert_eq!(input.parse::<Mechanism>().ok(), expected);
    }

    #[test]
    fn display() {
        assert_eq!(Mechanism::Plain.to_string(), "PLAIN");
        assert!(Mechanism::Plain.client_first());
        assert!(!Mechanism::Login.client_first());
    }
}
