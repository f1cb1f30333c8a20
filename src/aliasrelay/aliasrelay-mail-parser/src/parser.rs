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
use crate::{Mail, ParserResult};

/// An abstract mail parser
#[async_trait::async_trait]
pub trait MailParser: Default {
    /// Produce a [`Mail`] from the raw bytes of a message.
    ///
    /// # Errors
    ///
    /// * the input is not compliant
    fn parse_sync(&mut self, raw: &[u8]) -> ParserResult<Mail>;

    /// Read the lines of the `DATA` section, each one with its line ending.
    ///
    /// # Errors
    ///
    /// * the input is not compliant
    async fn parse<'a>(
        &'a mut self,
        mut stream: impl tokio_stream::Stream<Item = Vec<u8>> + Unpin + Send + 'a,
    ) -> ParserResult<Mail> {
        let mut buffer = vec![];

        while let Some(line) = tokio_stream::StreamExt::next(&mut stream).await {
            buffer.extend_from_slice(&line);
        }

        self.parse_sync(&buffer)
    }
}

/// Parser backed by `mailparse` for the header sections, the MIME tree is split by
/// hand so each body keeps its exact bytes.
#[derive(Default)]
pub struct MimeParser;

impl MailParser for MimeParser {
    fn parse_sync(&mut self, raw: &[u8]) -> ParserResult<Mail> {
        parse_part(raw, 0)
    }
}

// message/rfc822 inside multipart inside message/rfc822...
const MAX_DEPTH: usize = 32;

fn parse_part(raw: &[u8], depth: usize) -> ParserResult<Mail> {
    let (headers, offset) = mailparse::parse_headers(raw)?;

    let headers = crate::MailHeaders(
        headers
            .iter()
            .map(|h| {
                (
                    h.get_key(),
                    String::from_utf8_lossy(h.get_value_raw())
                        .chars()
                        .filter(|c| !matches!(c, '\r' | '\n'))
                        .collect::<String>()
                        .trim()
                        .to_string(),
                )
            })
            .collect(),
    );

    let body = raw.get(offset..).unwrap_or_default();
    let mut mail = Mail {
        headers,
        body: crate::Body::Regular(body.to_vec()),
    };

    if depth >= MAX_DEPTH {
        tracing::warn!("Message nesting is too deep, keeping the part as it is.");
        return Ok(mail);
    }

    let content_type = mail.content_type();
    if content_type.starts_with("multipart/") {
        let Some(boundary) = mail.content_type_param("boundary") else {
            tracing::debug!(content_type, "Multipart without boundary, read as a single part.");
            return Ok(mail);
        };
        let (preamble, parts, epilogue) = split_multipart(body, &boundary);

        mail.body = crate::Body::Multipart {
            boundary,
            preamble,
            parts: parts
                .into_iter()
                .map(|part| parse_part(part, depth + 1))
                .collect::<ParserResult<Vec<_>>>()?,
            epilogue,
        };
    } else if content_type == "message/delivery-status" {
        mail.body = crate::Body::Blocks(
            split_blocks(body)
                .into_iter()
                .map(|block| parse_part(block, depth + 1))
                .collect::<ParserResult<Vec<_>>>()?,
        );
    } else if content_type.starts_with("message/") {
        match parse_part(body, depth + 1) {
            Ok(embedded) => mail.body = crate::Body::Embedded(Box::new(embedded)),
            Err(error) => {
                tracing::debug!(%error, content_type, "Embedded message cannot be parsed, kept as raw.");
            }
        }
    }

    Ok(mail)
}

fn trim_line_ending(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Split the body of a multipart in its preamble, its parts and its epilogue.
///
/// The line ending before a delimiter belongs to the delimiter (RFC2046 5.1.1).
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> (Vec<u8>, Vec<&'a [u8]>, Vec<u8>) {
    let delimiter = format!("--{boundary}");
    let close = format!("--{boundary}--");

    let mut preamble_end = None;
    let mut parts = vec![];
    let mut current_start = None;
    let mut epilogue_start = None;

    let mut position = 0;
    for line in body.split_inclusive(|b| *b == b'\n') {
        let content = trim_line_ending(line);
        let content = content
            .iter()
            .rposition(|b| !b.is_ascii_whitespace())
            .map_or(&content[..0], |end| &content[..=end]);

        if content == close.as_bytes() || content == delimiter.as_bytes() {
            match current_start {
                Some(start) => parts.push(strip_last_line_ending(&body[start..position])),
                None => preamble_end = Some(position),
            }
            if content == close.as_bytes() {
                current_start = None;
                epilogue_start = Some(position + line.len());
                break;
            }
            current_start = Some(position + line.len());
        }
        position += line.len();
    }

    // no closing delimiter: the last part runs to the end
    if let Some(start) = current_start {
        parts.push(&body[start.min(body.len())..]);
    }

    let preamble = preamble_end.map_or_else(Vec::new, |end| body[..end].to_vec());
    let epilogue = epilogue_start.map_or_else(Vec::new, |start| {
        body.get(start..).unwrap_or_default().to_vec()
    });

    (preamble, parts, epilogue)
}

/// The non-empty header blocks of a `message/delivery-status` body.
fn split_blocks(body: &[u8]) -> Vec<&[u8]> {
    let mut blocks = vec![];
    let mut start = 0;
    let mut position = 0;

    for line in body.split_inclusive(|b| *b == b'\n') {
        if trim_line_ending(line).iter().all(u8::is_ascii_whitespace) {
            if position > start {
                blocks.push(&body[start..position]);
            }
            start = position + line.len();
        }
        position += line.len();
    }
    if position > start {
        blocks.push(&body[start..]);
    }
    blocks
}

fn strip_last_line_ending(part: &[u8]) -> &[u8] {
    part.strip_suffix(b"\r\n")
        .or_else(|| part.strip_suffix(b"\n"))
        .unwrap_or(part)
}
