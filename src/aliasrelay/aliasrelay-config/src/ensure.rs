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
use crate::{config::field::FieldServerSMTP, Config};
use aliasrelay_common::{auth::Mechanism, CodeID, Reply};

fn ehlo_reply(name: &str, mechanisms: Option<&[Mechanism]>) -> anyhow::Result<Reply> {
    [
        Some(format!("250-{name}\r\n")),
        mechanisms.map(|list| {
            format!(
                "250-AUTH {}\r\n",
                list.iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ")
            )
        }),
        Some("250-8BITMIME\r\n".to_string()),
        Some("250 SMTPUTF8\r\n".to_string()),
    ]
    .into_iter()
    .flatten()
    .collect::<String>()
    .parse::<Reply>()
}

impl Config {
    /// Check the consistency of the values, and produce the replies depending on them.
    ///
    /// # Errors
    ///
    /// * `app.email_domain` is empty
    /// * a delivery with zero attempt
    /// * a spam threshold is not a number
    pub(crate) fn ensure(mut config: Self) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !config.app.email_domain.is_empty(),
            "The field `app.email_domain` cannot be empty"
        );
        anyhow::ensure!(
            config.app.delivery.max_attempts != 0,
            "The field `app.delivery.max_attempts` cannot be 0"
        );
        anyhow::ensure!(
            !config.app.spam.max_score.is_nan() && !config.app.spam.max_reply_phase_score.is_nan(),
            "The spam thresholds must be numbers"
        );

        config.app.email_domain = config.app.email_domain.to_lowercase();
        if !config.app.alias_domains.contains(&config.app.email_domain) {
            config.app.alias_domains.push(config.app.email_domain.clone());
        }

        for (code, reply) in FieldServerSMTP::default_smtp_codes() {
            config.server.smtp.codes.entry(code).or_insert(reply);
        }

        if let Some(greetings) = config.server.smtp.codes.get_mut(&CodeID::Greetings) {
            let text = greetings.to_string().replace("{name}", &config.server.name);
            *greetings = text.parse::<Reply>()?;
        }

        config.server.smtp.codes.insert(
            CodeID::EhloPlain,
            ehlo_reply(&config.server.name, None)?,
        );
        config.server.smtp.codes.insert(
            CodeID::EhloSubmission,
            ehlo_reply(
                &config.server.name,
                Some(&[Mechanism::Plain, Mechanism::Login]),
            )?,
        );

        if config.app.secrets_are_default() {
            tracing::warn!("The VERP and unsubscribe secrets are the default ones, set them in `app`");
        }

        Ok(config)
    }
}

impl crate::field::FieldApp {
    fn secrets_are_default(&self) -> bool {
        self.verp.secret == Self::default_secret() || self.unsubscribe_secret == Self::default_secret()
    }
}
