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

//! aliasrelay common definition

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
#![allow(clippy::missing_const_for_fn)] // see https://github.com/rust-lang/rust-clippy/issues/9271

/// Default smtp port
pub const SMTP_PORT: u16 = 25;

/// Default submission over TLS port, the TLS layer itself is provided by a wrapping proxy
///
/// Defined in [RFC8314](https://tools.ietf.org/html/rfc8314)
pub const SUBMISSIONS_PORT: u16 = 465;

/// The null reverse-path, used by MTAs for bounces.
pub const NULL_SENDER: &str = "<>";

#[macro_use]
mod types {
    #[macro_use]
    pub mod address;
    pub mod code_id;
    pub mod reply;
    pub mod reply_code;
}

pub use types::{
    address::{is_valid_email, Address},
    code_id::CodeID,
    reply::Reply,
    reply_code::ReplyCode,
};

/// Status table of the relay, the stable contract with the upstream MTA
pub mod status;
pub use status::Status;

/// Data related to ESMTP Authentication
pub mod auth {
    mod mechanism;

    pub use mechanism::Mechanism;
}

/// Address and header value helpers.
pub mod utils;

#[doc(hidden)]
#[macro_export]
macro_rules! collection {
    // map-like
    ($($k:expr => $v:expr),* $(,)?) => {{
        use std::iter::{Iterator, IntoIterator};
        Iterator::collect(IntoIterator::into_iter([$(($k, $v),)*]))
    }};
    // set-like
    ($($v:expr),* $(,)?) => {{
        use std::iter::{Iterator, IntoIterator};
        Iterator::collect(IntoIterator::into_iter([$($v,)*]))
    }};
}
