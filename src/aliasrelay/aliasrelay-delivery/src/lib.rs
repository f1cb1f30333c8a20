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

//! aliasrelay outbound dispatcher
//!
//! Every message produced by the relay core (forwarded mails, replies, bounces,
//! notifications) leaves through a [`Dispatcher`], which hands it to a [`Transport`]
//! (the downstream MTA in production, see [`Sender`]).
//!
//! A failed attempt is retried when the error is transient, following a
//! [`RetryPolicy`]. Requests failing every attempt are saved in a [`Spool`] directory
//! and sent again by [`Dispatcher::resend_unsent`].

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

mod dispatcher;
mod error;
mod request;
mod retry;
mod sender;
mod spool;
mod transport;

pub use dispatcher::{Dispatcher, ResendReport};
pub use error::DeliveryError;
pub use request::SendRequest;
pub use retry::RetryPolicy;
pub use sender::{Sender, SenderParameters};
pub use spool::Spool;
pub use transport::{Failure, Recorder, Transport};
