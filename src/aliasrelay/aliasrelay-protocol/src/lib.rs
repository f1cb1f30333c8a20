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

//! aliasrelay protocol implementation
//!
//! The subset of ESMTP the relay needs to receive the hand-off of the front MTA and
//! the authenticated submissions: `HELO`, `EHLO`, `AUTH` (PLAIN and LOGIN), `MAIL`,
//! `RCPT`, `DATA`, `RSET`, `NOOP`, `HELP` and `QUIT`.
//!
//! There is no queue and no TLS, a wrapping layer terminates the implicit TLS of the
//! submission port.

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

mod command;
mod connection_kind;
mod receiver;
mod receiver_handler;
mod sink;
mod smtp_sasl;
mod stage;
mod stream;

pub use command::{
    AcceptArgs, AuthArgs, ClientName, EhloArgs, HeloArgs, MailFromArgs, ParseArgsError,
    RcptToArgs, UnparsedArgs, Verb,
};
pub use connection_kind::ConnectionKind;
pub use receiver::{Receiver, ReceiverContext, ReceiverLimits};
pub use receiver_handler::ReceiverHandler;
pub use smtp_sasl::{AuthError, Credentials};
pub use stage::Stage;
pub use stream::Error;

#[cfg(test)]
mod tests;
