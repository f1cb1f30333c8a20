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
/// Content-Transfer-Encoding of a leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferEncoding {
    /// Also the value for a missing or unknown header.
    SevenBit,
    ///
    EightBit,
    ///
    QuotedPrintable,
    ///
    Base64,
}

impl TransferEncoding {
    /// Read the value of the header, tolerating the variants seen in the wild.
    #[must_use]
    pub fn from_header(value: Option<&str>) -> Self {
        let value = value
            .unwrap_or_default()
            .trim()
            .trim_matches(|c| c == '"' || c == '\'')
            .to_lowercase();

        match value.as_str() {
            "base64" => Self::Base64,
            "quoted-printable" => Self::QuotedPrintable,
            "8bit" | "8bits" | "8bit;" | "binary" | "utf-8" => Self::EightBit,
            "" | "7bit" | "7-bit" | "7bits" => Self::SevenBit,
            unknown => {
                tracing::debug!(unknown, "Unknown transfer encoding, read as 7bit.");
                Self::SevenBit
            }
        }
    }

    ///
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SevenBit => "7bit",
            Self::EightBit => "8bit",
            Self::QuotedPrintable => "quoted-printable",
            Self::Base64 => "base64",
        }
    }

    /// Encode an utf-8 text, the line endings become CRLF.
    #[must_use]
    pub fn encode(self, text: &str) -> Vec<u8> {
        let text = text.replace("\r\n", "\n").replace('\n', "\r\n");
        match self {
            Self::SevenBit | Self::EightBit => text.into_bytes(),
            Self::QuotedPrintable => quoted_printable::encode(text.as_bytes()),
            Self::Base64 => {
                let encoded =
                    base64::Engine::encode(&base64::engine::general_purpose::STANDARD, text);
                let mut out = Vec::with_capacity(encoded.len() + encoded.len() / 38);
                for line in encoded.as_bytes().chunks(76) {
                    out.extend_from_slice(line);
                    out.extend_from_slice(b"\r\n");
                }
                out
            }
        }
    }

    /// Decode the bytes of a body, the charset is not interpreted.
    ///
    /// # Errors
    ///
    /// * the body is not valid for the encoding
    pub fn decode(self, raw: &[u8]) -> crate::ParserResult<Vec<u8>> {
        match self {
            Self::SevenBit | Self::EightBit => Ok(raw.to_vec()),
            Self::QuotedPrintable => {
                quoted_printable::decode(raw, quoted_printable::ParseMode::Robust)
                    .map_err(|e| crate::ParserError::Encoding(e.to_string()))
            }
            Self::Base64 => base64::Engine::decode(
                &base64::engine::general_purpose::STANDARD,
                raw.iter()
                    .copied()
                    .filter(|b| !b.is_ascii_whitespace())
                    .collect::<Vec<_>>(),
            )
            .map_err(|e| crate::ParserError::Encoding(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TransferEncoding;

    #[rstest::rstest]
    #[case(None, TransferEncoding::SevenBit)]
    #[case(Some(""), TransferEncoding::SevenBit)]
    #[case(Some("\"Base64\""), TransferEncoding::Base64)]
    #[case(Some(" quoted-printable"), TransferEncoding::QuotedPrintable)]
    #[case(Some("8bit;"), TransferEncoding::EightBit)]
    #[case(Some("amazonses.com"), TransferEncoding::SevenBit)]
    fn from_header(#[case] input: Option<&str>, #[case] expected: TransferEncoding) {
        assert_eq!(TransferEncoding::from_header(input), expected);
    }

    #[rstest::rstest]
    #[case(TransferEncoding::Base64)]
    #[case(TransferEncoding::QuotedPrintable)]
    #[case(TransferEncoding::EightBit)]
    fn encode_decode(#[case] encoding: TransferEncoding) {
        let text = "Héllo wörld\r\nsecond line with a very long content that should be wrapped by the encoder at some point\r\n";
        let encoded = encoding.encode(text);
        assert_eq!(
            String::from_utf8(encoding.decode(&encoded).unwrap()).unwrap(),
            text
        );
    }

    #[test]
    fn base64_lines() {
        let encoded = TransferEncoding::Base64.encode(&"a".repeat(200));
        assert!(encoded
            .split(|b| *b == b'\n')
            .all(|line| line.len() <= 77));
    }
}
