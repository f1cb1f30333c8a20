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
use crate::{ParserError, ParserResult};

/// Parse an address header like `"ab <ab@sd.com>, cd <cd@cd.com>"` into
/// `[("ab", "ab@sd.com"), ("cd", "cd@cd.com")]`.
///
/// The members of a group are flattened, the encoded words are decoded.
///
/// # Errors
///
/// * one of the entries is not a mailbox
pub fn parse_address_list(address_list: &str) -> ParserResult<Vec<(String, String)>> {
    if address_list.trim().is_empty() {
        return Ok(vec![]);
    }

    let line = format!("To: {address_list}\r\n");
    let (header, _) = mailparse::parse_header(line.as_bytes())?;
    let list = mailparse::addrparse_header(&header)
        .map_err(|_| ParserError::InvalidAddress(address_list.to_string()))?;

    Ok(list
        .iter()
        .flat_map(|addr| match addr {
            mailparse::MailAddr::Single(single) => vec![single],
            mailparse::MailAddr::Group(group) => group.addrs.iter().collect(),
        })
        .map(|single| {
            (
                single.display_name.clone().unwrap_or_default(),
                single.addr.trim().to_string(),
            )
        })
        .collect())
}

/// Parse a single mailbox, `ab <cd@xy.com>` gives `("ab", "cd@xy.com")`.
///
/// # Errors
///
/// * the input is not exactly one mailbox
pub fn parse_full_address(full_address: &str) -> ParserResult<(String, String)> {
    let mut list = parse_address_list(full_address)?;
    match (list.pop(), list.is_empty()) {
        (Some(single), true) if !single.1.is_empty() => Ok(single),
        _ => Err(ParserError::InvalidAddress(full_address.to_string())),
    }
}

const SPECIALS: &[char] = &[
    '(', ')', '<', '>', '@', ',', ':', ';', '.', '"', '[', ']', '\\',
];

/// Format a mailbox for a header, the display name is encoded when it is not ascii
/// and quoted when it contains special characters.
///
/// ```
/// # use aliasrelay_mail_parser::format_address;
/// assert_eq!(format_address("", "a@b.c"), "a@b.c");
/// assert_eq!(format_address("John", "a@b.c"), "John <a@b.c>");
/// assert_eq!(format_address("a@b.c - John", "r@x.y"), "\"a@b.c - John\" <r@x.y>");
/// assert_eq!(format_address("Jöhn", "a@b.c"), "=?utf-8?b?SsO2aG4=?= <a@b.c>");
/// ```
#[must_use]
pub fn format_address(name: &str, address: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        return address.to_string();
    }

    if !name.is_ascii() {
        let encoded = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, name);
        return format!("=?utf-8?b?{encoded}?= <{address}>");
    }

    if name.contains(SPECIALS) {
        let escaped = name.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{escaped}\" <{address}>")
    } else {
        format!("{name} <{address}>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    #[case("", vec![])]
    #[case("a@b.c", vec![("", "a@b.c")])]
    #[case(
        "ab <ab@sd.com>, \"c, d\" <cd@cd.com>",
        vec![("ab", "ab@sd.com"), ("c, d", "cd@cd.com")]
    )]
    #[case(
        "=?UTF-8?B?TmjGoW4gTmd1eeG7hW4=?= <abcd@gmail.com>",
        vec![("Nhơn Nguyễn", "abcd@gmail.com")]
    )]
    #[case("friends: a@b.c, d@e.f;", vec![("", "a@b.c"), ("", "d@e.f")])]
    fn list(#[case] input: &str, #[case] expected: Vec<(&str, &str)>) {
        pretty_assertions::assert_eq!(
            parse_address_list(input).unwrap(),
            expected
                .into_iter()
                .map(|(n, a)| (n.to_string(), a.to_string()))
                .collect::<Vec<_>>()
        );
    }

    #[test]
    fn full_address() {
        assert_eq!(
            parse_full_address("First Last <first@example.com>").unwrap(),
            ("First Last".to_string(), "first@example.com".to_string())
        );
        assert!(parse_full_address("a@b.c, d@e.f").is_err());
        assert!(parse_full_address("").is_err());
    }

    #[test]
    fn format_round_trip() {
        for (name, address) in [("Jöhn Doe", "j@d.com"), ("a@b.c - x", "r@s.t"), ("", "z@z.z")] {
            let formatted = format_address(name, address);
            assert_eq!(
                parse_full_address(&formatted).unwrap(),
                (name.to_string(), address.to_string())
            );
        }
    }
}
