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
///
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout(pub std::time::Duration);

impl std::str::FromStr for Timeout {
    type Err = humantime::DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        humantime::parse_duration(s).map(Timeout)
    }
}

///
#[derive(Debug, clap::Parser, PartialEq, Eq)]
#[clap(about, author)]
pub struct Args {
    /// Print the version and exit.
    #[clap(short, long, action)]
    pub version: bool,

    /// Path of the configuration file (toml format)
    #[clap(short, long, action)]
    pub config: Option<String>,

    /// Also write the logs to stdout
    #[clap(long, action)]
    pub stdout: bool,

    /// Make the server stop after a delay (human readable format)
    #[clap(short, long, value_parser)]
    pub timeout: Option<Timeout>,

    ///
    #[clap(subcommand)]
    pub command: Option<Commands>,
}

///
#[derive(Debug, Clone, clap::Subcommand, PartialEq, Eq)]
pub enum Commands {
    /// Show the loaded config (as serialized json format)
    ConfigShow,
    /// Try once more to deliver the messages kept in the unsent directory
    ResendUnsent,
}
