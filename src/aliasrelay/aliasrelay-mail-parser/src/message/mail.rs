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
use crate::{ParserError, ParserResult, TransferEncoding};

/// we use Vec instead of a `HashMap` because header ordering is important.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MailHeaders(pub Vec<(String, String)>);

impl std::fmt::Display for MailHeaders {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (name, value) in &self.0 {
            write!(f, "{}", HeaderFoldable(name, value))?;
        }
        Ok(())
    }
}

/// see rfc5322 (section 2.1 and 2.3) and rfc2046
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// A leaf, the bytes are still in their transfer encoding.
    Regular(Vec<u8>),
    /// A `multipart/*` part.
    Multipart {
        /// Value of the `boundary` parameter.
        boundary: String,
        /// Text before the first delimiter, ignored by the readers.
        preamble: Vec<u8>,
        /// The parts between the delimiters.
        parts: Vec<Mail>,
        /// Text after the closing delimiter.
        epilogue: Vec<u8>,
    },
    /// A `message/*` part, a `message/rfc822` or a `message/feedback-report` for instance.
    Embedded(Box<Mail>),
    /// A `message/delivery-status` part: header blocks separated by blank lines.
    Blocks(Vec<Mail>),
}

impl Default for Body {
    fn default() -> Self {
        Self::Regular(vec![])
    }
}

/// A message, or one of its parts.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Mail {
    /// Headers of the part, the values are unfolded but not decoded.
    pub headers: MailHeaders,
    ///
    pub body: Body,
}

#[derive(Debug)]
struct HeaderFoldable<'a>(&'a str, &'a str);

impl<'a> std::fmt::Display for HeaderFoldable<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.0)?;
        f.write_str(": ")?;

        let mut byte_writable = self.1;
        if byte_writable.is_empty() {
            return f.write_str("\r\n");
        }

        let mut prev = self.0.len() + 2;

        // folding on a whitespace only, base64 values (like dkim) must stay continuous
        while !byte_writable.is_empty() {
            let (left, right) = if byte_writable.len() + prev > 998 {
                byte_writable
                    .get(..998_usize.saturating_sub(prev))
                    .and_then(|head| head.rfind(char::is_whitespace))
                    .filter(|idx| *idx != 0)
                    .map(|idx| (&byte_writable[..idx], &byte_writable[idx..]))
            } else {
                None
            }
            .unwrap_or((byte_writable, ""));

            f.write_str(left)?;
            f.write_str("\r\n")?;

            byte_writable = right;
            prev = 0;
        }
        Ok(())
    }
}

impl Mail {
    /// A single part message.
    #[must_use]
    pub fn new(headers: Vec<(String, String)>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers: MailHeaders(headers),
            body: Body::Regular(body.into()),
        }
    }

    /// A `multipart/{subtype}` container with a random boundary.
    #[must_use]
    pub fn new_multipart(subtype: &str, params: &[(&str, &str)], parts: Vec<Self>) -> Self {
        let boundary = format!(
            "{}{}",
            "=".repeat(15),
            std::iter::repeat_with(fastrand::alphanumeric)
                .take(24)
                .collect::<String>()
        );
        let content_type = std::iter::once(format!("multipart/{subtype}"))
            .chain(params.iter().map(|(k, v)| format!("{k}=\"{v}\"")))
            .chain(std::iter::once(format!("boundary=\"{boundary}\"")))
            .collect::<Vec<_>>()
            .join("; ");

        Self {
            headers: MailHeaders(vec![
                ("MIME-Version".to_string(), "1.0".to_string()),
                ("Content-Type".to_string(), content_type),
            ]),
            body: Body::Multipart {
                boundary,
                preamble: vec![],
                parts,
                epilogue: vec![],
            },
        }
    }

    /// Serialize the message as it would be sent on the wire.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.headers.to_string().into_bytes();
        out.extend_from_slice(b"\r\n");
        self.write_body(&mut out);
        out
    }

    fn write_body(&self, out: &mut Vec<u8>) {
        match &self.body {
            Body::Regular(bytes) => out.extend_from_slice(bytes),
            Body::Embedded(mail) => out.extend_from_slice(&mail.to_bytes()),
            Body::Blocks(blocks) => {
                for block in blocks {
                    out.extend_from_slice(block.headers.to_string().as_bytes());
                    out.extend_from_slice(b"\r\n");
                }
            }
            Body::Multipart {
                boundary,
                preamble,
                parts,
                epilogue,
            } => {
                out.extend_from_slice(preamble);
                for part in parts {
                    out.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
                    out.extend_from_slice(&part.to_bytes());
                    out.extend_from_slice(b"\r\n");
                }
                out.extend_from_slice(format!("--{boundary}--\r\n").as_bytes());
                out.extend_from_slice(epilogue);
            }
        }
    }

    /// get the value of the first occurrence of a header, the name is case insensitive.
    #[must_use]
    pub fn get_header(&self, name: &str) -> Option<&str> {
        self.headers
            .0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// get the values of every occurrence of a header.
    pub fn get_headers<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .0
            .iter()
            .filter(move |(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// get the value of a header, with the RFC2047 encoded words decoded.
    #[must_use]
    pub fn get_header_decoded(&self, name: &str) -> Option<String> {
        self.get_header(name).map(|value| decode_header_value(name, value))
    }

    /// Count the number of headers with the given name.
    #[must_use]
    pub fn count_header(&self, name: &str) -> usize {
        self.get_headers(name).count()
    }

    /// push a header to the header section.
    pub fn add_header(&mut self, name: &str, value: &str) {
        self.headers.0.push((name.to_string(), value.to_string()));
    }

    /// prepend a header to the header section.
    pub fn prepend_header(&mut self, name: &str, value: &str) {
        self.headers
            .0
            .insert(0, (name.to_string(), value.to_string()));
    }

    /// Replace the first occurrence of the header and remove the others,
    /// or push it if it does not exist.
    pub fn add_or_replace_header(&mut self, name: &str, value: &str) {
        let mut found = false;
        self.headers.0.retain_mut(|(key, old)| {
            if !key.eq_ignore_ascii_case(name) {
                return true;
            }
            if found {
                return false;
            }
            found = true;
            *old = value.to_string();
            true
        });
        if !found {
            self.add_header(name, value);
        }
    }

    /// Remove every occurrence of a header, return `true` if one was removed.
    pub fn delete_header(&mut self, name: &str) -> bool {
        let before = self.headers.0.len();
        self.headers.0.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        before != self.headers.0.len()
    }

    /// Remove the surrounding blanks and the line breaks of every occurrence of the header.
    pub fn sanitize_header(&mut self, name: &str) {
        for (_, value) in self
            .headers
            .0
            .iter_mut()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
        {
            *value = value.trim().replace(['\r', '\n'], " ");
        }
    }

    /// Keep only the headers of the list, the names are case insensitive.
    pub fn delete_all_headers_except(&mut self, keep: &[&str]) {
        self.headers
            .0
            .retain(|(key, _)| keep.iter().any(|k| k.eq_ignore_ascii_case(key)));
    }

    /// The mime type of the part, lowercased, `text/plain` by default.
    #[must_use]
    pub fn content_type(&self) -> String {
        self.get_header("Content-Type")
            .map(|value| mailparse::parse_content_type(value).mimetype.to_lowercase())
            .filter(|mime| mime.contains('/'))
            .unwrap_or_else(|| "text/plain".to_string())
    }

    /// A parameter of the `Content-Type` header.
    #[must_use]
    pub fn content_type_param(&self, key: &str) -> Option<String> {
        self.get_header("Content-Type").and_then(|value| {
            mailparse::parse_content_type(value)
                .params
                .get(&key.to_lowercase())
                .cloned()
        })
    }

    fn set_content_type_param(&mut self, key: &str, value: &str) {
        let parsed = mailparse::parse_content_type(
            self.get_header("Content-Type").unwrap_or("text/plain"),
        );
        let mut params = parsed.params;
        params.insert(key.to_lowercase(), value.to_string());

        let content_type = std::iter::once(parsed.mimetype)
            .chain(params.into_iter().map(|(k, v)| format!("{k}=\"{v}\"")))
            .collect::<Vec<_>>()
            .join("; ");
        self.add_or_replace_header("Content-Type", &content_type);
    }

    /// The part is a `multipart/*` with its children parsed.
    #[must_use]
    pub const fn is_multipart(&self) -> bool {
        matches!(self.body, Body::Multipart { .. })
    }

    /// The children of a multipart, empty otherwise.
    #[must_use]
    pub fn parts(&self) -> &[Self] {
        match &self.body {
            Body::Multipart { parts, .. } => parts,
            _ => &[],
        }
    }

    /// The parts in depth-first order, starting with the message itself.
    ///
    /// A `message/*` part is followed by the message it contains, and a
    /// `message/delivery-status` by each of its blocks.
    #[must_use]
    pub fn walk(&self) -> Vec<&Self> {
        let mut out = vec![];
        let mut stack = vec![self];
        while let Some(current) = stack.pop() {
            out.push(current);
            match &current.body {
                Body::Regular(_) => {}
                Body::Embedded(mail) => stack.push(mail),
                Body::Multipart { parts, .. } | Body::Blocks(parts) => {
                    stack.extend(parts.iter().rev());
                }
            }
        }
        out
    }

    /// The `n`-th part of [`Self::walk`], starting at 1 for the message itself.
    #[must_use]
    pub fn nth_part(&self, n: usize) -> Option<&Self> {
        n.checked_sub(1).and_then(|idx| self.walk().get(idx).copied())
    }

    /// The transfer encoding declared in the headers of the part.
    #[must_use]
    pub fn transfer_encoding(&self) -> TransferEncoding {
        TransferEncoding::from_header(self.get_header("Content-Transfer-Encoding"))
    }

    /// The text of a leaf, with the transfer encoding and the charset decoded.
    ///
    /// # Errors
    ///
    /// * the part is not a leaf
    /// * the transfer encoding is broken
    pub fn decoded_text(&self) -> ParserResult<String> {
        if !matches!(self.body, Body::Regular(_)) {
            return Err(ParserError::Encoding(format!(
                "'{}' is not a text part",
                self.content_type()
            )));
        }
        let bytes = self.to_bytes();
        Ok(mailparse::parse_mail(&bytes)?.get_body()?)
    }

    /// Replace the text of a leaf, it is encoded with the transfer encoding already
    /// declared and the charset becomes `utf-8`.
    pub fn set_decoded_text(&mut self, text: &str) {
        let mut encoding = self.transfer_encoding();
        if encoding == TransferEncoding::SevenBit && !text.is_ascii() {
            encoding = TransferEncoding::EightBit;
            self.add_or_replace_header("Content-Transfer-Encoding", encoding.as_str());
        }
        self.body = Body::Regular(encoding.encode(text));
        if self.content_type().starts_with("text/") {
            self.set_content_type_param("charset", "utf-8");
        }
    }

    /// Visit every leaf and embedded message of the tree, the closure decides
    /// whether to descend into the children.
    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut Self) -> bool) {
        if !f(self) {
            return;
        }
        match &mut self.body {
            Body::Regular(_) => {}
            Body::Embedded(mail) => mail.visit_mut(f),
            Body::Multipart { parts, .. } | Body::Blocks(parts) => {
                for part in parts {
                    part.visit_mut(f);
                }
            }
        }
    }

    /// The children of a multipart, mutable.
    pub fn parts_mut(&mut self) -> &mut [Self] {
        match &mut self.body {
            Body::Multipart { parts, .. } => parts,
            _ => &mut [],
        }
    }
}

impl std::fmt::Display for Mail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.to_bytes()))
    }
}

impl std::str::FromStr for Mail {
    type Err = ParserError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        crate::MailParser::parse_sync(&mut crate::MimeParser, s.as_bytes())
    }
}

/// Decode the RFC2047 encoded words of a header value.
#[must_use]
pub fn decode_header_value(name: &str, value: &str) -> String {
    let line = format!("{name}: {value}\r\n");
    mailparse::parse_header(line.as_bytes())
        .map_or_else(|_| value.to_string(), |(header, _)| header.get_value())
}

// 75 characters at most for an encoded word, `=?utf-8?b?` and `?=` included
const ENCODED_WORD_MAX_BYTES: usize = 45;

/// Encode a non ascii header value as RFC2047 encoded words, an ascii value is kept.
///
/// ```
/// # use aliasrelay_mail_parser::encode_header_value;
/// assert_eq!(encode_header_value("hello"), "hello");
/// assert_eq!(encode_header_value("Jöhn"), "=?utf-8?b?SsO2aG4=?=");
/// ```
#[must_use]
pub fn encode_header_value(value: &str) -> String {
    if value.is_ascii() {
        return value.to_string();
    }

    let mut words = vec![];
    let mut start = 0;
    while start < value.len() {
        let mut end = (start + ENCODED_WORD_MAX_BYTES).min(value.len());
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        let encoded = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            &value[start..end],
        );
        words.push(format!("=?utf-8?b?{encoded}?="));
        start = end;
    }
    words.join(" ")
}
