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
/// Address Email
#[derive(Clone, Debug, Eq, serde_with::SerializeDisplay, serde_with::DeserializeFromStr)]
pub struct Address {
    at_sign: usize,
    full: String,
}

/// Syntax sugar Address object from dyn `ToString`
///
/// # Panics
///
/// if the argument failed to be converted
#[macro_export]
macro_rules! addr {
    ($e:expr) => {
        <$crate::Address as core::str::FromStr>::from_str($e).unwrap()
    };
}

impl std::str::FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.is_ascii() {
            anyhow::bail!("'{s}' is not a valid address: non ascii characters are not allowed")
        }
        if let Err(error) = addr::parse_email_address(s) {
            anyhow::bail!("'{s}' is not a valid address: {error}")
        }
        match s.rfind('@') {
            Some(at_sign) => Ok(Self {
                at_sign,
                full: s.to_string(),
            }),
            None => anyhow::bail!("'{s}' is not a valid address: missing '@'"),
        }
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.full == other.full
    }
}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.full.hash(state);
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.full
    }
}

impl Address {
    /// get the full email address.
    #[must_use]
    pub fn full(&self) -> &str {
        &self.full
    }

    /// get the user of the address.
    #[must_use]
    pub fn local_part(&self) -> &str {
        &self.full[..self.at_sign]
    }

    /// get the fqdn of the address.
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.full[self.at_sign + 1..]
    }

    /// Convert to the address type of the outbound transport.
    ///
    /// # Errors
    ///
    /// * lettre rejected the local part or the domain
    pub fn to_lettre(&self) -> anyhow::Result<lettre::Address> {
        Ok(lettre::Address::new(self.local_part(), self.domain())?)
    }
}

/// Check the syntax of an address, without any DNS lookup and without unicode.
#[must_use]
pub fn is_valid_email(address: &str) -> bool {
    <Address as std::str::FromStr>::from_str(address).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize() {
        let parsed = serde_json::from_str::<Address>(r#""hello@domain.com""#).unwrap();
        assert_eq!(
            parsed,
            Address {
                full: "hello@domain.com".to_string(),
                at_sign: 5
            }
        );
        assert_eq!(parsed.local_part(), "hello");
        assert_eq!(parsed.domain(), "domain.com");
    }

    #[test]
    fn serialize() {
        assert_eq!(
            serde_json::to_string(&addr!("hello@domain.com")).unwrap(),
            r#""hello@domain.com""#
        );
    }

    #[rstest::rstest]
    #[case("john.doe@example.com", true)]
    #[case("reply+abc@sl.example.com", true)]
    #[case("no-at-sign", false)]
    #[case("", false)]
    #[case("jöhn@example.com", false)]
    #[case("john@", false)]
    fn validity(#[case] input: &str, #[case] expected: bool) {
        assert_eq!(crate::is_valid_email(input), expected);
    }

    #[test]
    fn to_lettre() {
        let address = addr!("a.b@c.d");
        assert_eq!(address.to_lettre().unwrap().to_string(), "a.b@c.d");
    }
}
