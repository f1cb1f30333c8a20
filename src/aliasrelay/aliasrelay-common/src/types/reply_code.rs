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
/// Codes as the start of each lines of a reply
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(untagged)]
pub enum ReplyCode {
    /// simple Reply Code as defined in RFC5321
    Code {
        /// code base
        code: u16,
    },
    /// enhanced codes, see RFC3463
    Enhanced {
        /// code base
        code: u16,
        /// `class.subject.detail`
        enhanced: String,
    },
}

impl ReplyCode {
    /// Is the code a transient (4xx) or permanent (5xx) failure
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.value() / 100 >= 4
    }

    /// Is the code a permanent (5xx) failure
    #[must_use]
    pub fn is_permanent(&self) -> bool {
        self.value() / 100 == 5
    }

    /// Return the underlying value of the reply code
    #[must_use]
    pub fn value(&self) -> u16 {
        match self {
            Self::Code { code, .. } | Self::Enhanced { code, .. } => *code,
        }
    }

    /// Return the enhanced value of the reply code
    #[must_use]
    pub fn details(&self) -> Option<&str> {
        match self {
            Self::Enhanced { enhanced, .. } => Some(enhanced),
            Self::Code { .. } => None,
        }
    }

    fn parse_code(word: &str) -> Option<u16> {
        if word.len() != 3 || !word.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        word.parse::<u16>().ok().filter(|c| (200..600).contains(c))
    }

    fn parse_enhanced(word: &str) -> Option<String> {
        let mut digits = word.splitn(3, '.').map(str::parse::<u16>);
        let (a, b, c) = (
            digits.next()?.ok()?,
            digits.next()?.ok()?,
            digits.next()?.ok()?,
        );
        Some(format!("{a}.{b}.{c}"))
    }

    /// Parse the code at the start of a reply line, returning the code and the remainder
    /// of the line (starting with the separator, if any).
    pub(super) fn parse_line(s: &str) -> anyhow::Result<(Self, &str)> {
        let code = s
            .get(..3)
            .and_then(Self::parse_code)
            .ok_or_else(|| anyhow::anyhow!("cannot parse reply code in {s:?}"))?;
        let rest = &s[3..];

        let after_sep = rest.strip_prefix([' ', '-']).unwrap_or(rest);
        let word_end = after_sep.find(' ').unwrap_or(after_sep.len());

        match Self::parse_enhanced(&after_sep[..word_end]) {
            Some(enhanced) if !rest.is_empty() => Ok((
                Self::Enhanced { code, enhanced },
                &after_sep[word_end..],
            )),
            _ => Ok((Self::Code { code }, rest)),
        }
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Code { code } => write!(f, "{code}"),
            Self::Enhanced { code, enhanced } => write!(f, "{code} {enhanced}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ReplyCode;

    #[rstest::rstest]
    #[case("250", ReplyCode::Code { code: 250 }, "", "250")]
    #[case("504 5.5.4", ReplyCode::Enhanced { code: 504, enhanced: "5.5.4".to_string() }, "", "504 5.5.4")]
    #[case("250-2.0.0", ReplyCode::Enhanced { code: 250, enhanced: "2.0.0".to_string() }, "", "250 2.0.0")]
    #[case("250 Ok", ReplyCode::Code { code: 250 }, " Ok", "250")]
    #[case("550 SL E502 Email not exist", ReplyCode::Code { code: 550 }, " SL E502 Email not exist", "550")]
    #[case("535 5.7.8 Authentication credentials invalid", ReplyCode::Enhanced { code: 535, enhanced: "5.7.8".to_string() }, " Authentication credentials invalid", "535 5.7.8")]
    fn parse_line(
        #[case] input: &str,
        #[case] expected: ReplyCode,
        #[case] remainder: &str,
        #[case] to_string: &str,
    ) {
        let (code, rest) = ReplyCode::parse_line(input).unwrap();
        pretty_assertions::assert_eq!(code, expected);
        pretty_assertions::assert_eq!(rest, remainder);
        pretty_assertions::assert_eq!(code.to_string(), to_string);
    }

    #[rstest::rstest]
    #[case("")]
    #[case("25")]
    #[case("abc ok")]
    #[case("999 too big")]
    fn parse_line_invalid(#[case] input: &str) {
        assert!(ReplyCode::parse_line(input).is_err());
    }

    #[test]
    fn classes() {
        assert!(!ReplyCode::Code { code: 250 }.is_error());
        assert!(ReplyCode::Code { code: 421 }.is_error());
        assert!(!ReplyCode::Code { code: 421 }.is_permanent());
        assert!(ReplyCode::Code { code: 550 }.is_permanent());
    }
}
