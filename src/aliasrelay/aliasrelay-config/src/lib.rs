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

//! aliasrelay configuration
//!
//! The relay reads one TOML file at startup, given with the `-c, --config` flag
//! of the `aliasrelay` binary.
//!
//! Every field except `version_requirement` and `app.email_domain` has a default
//! value, see the `default_*` functions of each field.
//!
//! The file is parsed right after starting the program, producing an error if the
//! syntax is invalid, if a field is unknown or if the version requirement is not
//! fulfilled by the running binary.
//!
//! # Example
//!
//! ```
//! let config = aliasrelay_config::Config::from_toml(r#"
//! version_requirement = ">=0.1.0"
//!
//! [app]
//! email_domain = "sl.example.com"
//! "#).unwrap();
//!
//! assert_eq!(config.app.noreply(), "noreply@sl.example.com");
//! ```

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
#![allow(clippy::use_self)] // false positive

#[cfg(test)]
mod tests;

mod parser {
    pub mod socket_addr;
    pub mod tracing_directive;
}

mod config;
mod default;
mod ensure;

pub use config::{field, Config};

impl Config {
    /// Parse a [`Config`] with [TOML] format
    ///
    /// # Errors
    ///
    /// * data is not a valid [TOML]
    /// * one field is unknown
    /// * the version requirement are not fulfilled
    /// * a mandatory field is not provided (no default value)
    /// * the values are not consistent, see [`Config::ensure`]
    ///
    /// [TOML]: https://github.com/toml-lang/toml
    pub fn from_toml(input: &str) -> anyhow::Result<Self> {
        #[derive(serde::Serialize, serde::Deserialize)]
        struct VersionRequirement {
            version_requirement: semver::VersionReq,
        }

        let version_requirement = toml::from_str::<VersionRequirement>(input)?.version_requirement;
        let pkg_version = semver::Version::parse(env!("CARGO_PKG_VERSION"))?;

        if !version_requirement.matches(&pkg_version) {
            anyhow::bail!(
                "Version requirement not fulfilled: expected '{version_requirement}' but got '{pkg_version}'"
            );
        }

        toml::from_str::<Self>(input)
            .map(Self::ensure)
            .map_err(anyhow::Error::new)?
    }

    /// Build a configuration for the given domain with every other field to its default.
    ///
    /// # Errors
    ///
    /// * see [`Config::ensure`]
    pub fn with_email_domain(email_domain: impl Into<String>) -> anyhow::Result<Self> {
        let email_domain = email_domain.into();
        Self::ensure(Self {
            version_requirement: Self::default_version_requirement(),
            server: field::FieldServer::default(),
            app: field::FieldApp {
                alias_domains: vec![email_domain.clone()],
                email_domain,
                ..field::FieldApp::default()
            },
        })
    }
}
