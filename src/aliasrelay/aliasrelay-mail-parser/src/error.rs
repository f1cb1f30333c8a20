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
/// Errors produced while reading or rewriting a message.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParserError {
    /// The header section or a part could not be read.
    #[error("parsing email failed: {0}")]
    InvalidMail(String),
    /// A multipart part without the `boundary` parameter.
    #[error("Boundary not found in content-type header parameters, {0}")]
    BoundaryNotFound(String),
    /// An address header that cannot be read as a list of mailboxes.
    #[error("invalid address: '{0}'")]
    InvalidAddress(String),
    /// The transfer encoding of a body is broken.
    #[error("cannot decode body: {0}")]
    Encoding(String),
}

impl From<mailparse::MailParseError> for ParserError {
    fn from(value: mailparse::MailParseError) -> Self {
        Self::InvalidMail(value.to_string())
    }
}

///
pub type ParserResult<T> = Result<T, ParserError>;
