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
/// Normalize an address as written in an envelope: surrounding blanks, inner spaces
/// and right-to-left marks are dropped, and the result is lowercased.
///
/// ```
/// # use aliasrelay_common::utils::sanitize_email;
/// assert_eq!(sanitize_email(" John.Doe@Example.com\n"), "john.doe@example.com");
/// ```
#[must_use]
pub fn sanitize_email(address: &str) -> String {
    sanitize_email_keep_case(address).to_lowercase()
}

/// Same as [`sanitize_email`] but keeps the case, used for contact addresses.
#[must_use]
pub fn sanitize_email_keep_case(address: &str) -> String {
    address
        .trim()
        .chars()
        .filter(|c| !matches!(c, ' ' | '\u{200f}'))
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Header values may contain folding whitespace, collapse it.
#[must_use]
pub fn sanitize_header_value(value: &str) -> String {
    value
        .trim()
        .chars()
        .filter(|c| !matches!(c, '\r' | '\n'))
        .collect()
}

/// The domain of an address, lowercased. Empty when there is no `@`.
#[must_use]
pub fn email_domain_part(address: &str) -> String {
    address
        .rfind('@')
        .map(|idx| address[idx + 1..].to_lowercase())
        .unwrap_or_default()
}

/// The local part of an address, lowercased.
#[must_use]
pub fn email_local_part(address: &str) -> String {
    address
        .rfind('@')
        .map_or(address, |idx| &address[..idx])
        .to_lowercase()
}
