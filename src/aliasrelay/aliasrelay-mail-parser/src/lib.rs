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

//! aliasrelay message model
//!
//! A message received by the relay is parsed once in a [`Mail`], a tree of parts
//! keeping the headers in order and the bodies as they were on the wire, so that a
//! message the relay does not touch is forwarded byte for byte.
//!
//! The relay core then rewrites it in place: headers, text bodies and banners.

#![doc(html_no_source)]
#![deny(missing_docs)]
#![forbid(unsafe_code)]
//
#![warn(rust_2018_idioms)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
//
#![allow(clippy::module_name_repetitions)]

mod error;

mod message {
    pub mod address;
    pub mod encoding;
    pub mod mail;
    pub mod transform;
}

mod parser;

pub use error::{ParserError, ParserResult};
pub use message::{
    address::{format_address, parse_address_list, parse_full_address},
    encoding::TransferEncoding,
    mail::{decode_header_value, encode_header_value, Body, Mail, MailHeaders},
};
pub use parser::{MailParser, MimeParser};

#[cfg(test)]
mod tests;
