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
//! Spam gate, the scores come from an external scorer or from the
//! `X-Spam-Status` header stamped by an upstream filter.

use crate::{
    models::{Alias, Contact, EmailLog, Mailbox, User},
    notify::{AlertType, Notification, Template},
    HandlerResult, RelayContext,
};
use aliasrelay_mail_parser::{Body, Mail};

/// Score given to a message the scorer failed on, it is never spam.
pub const SCORE_ON_FAILURE: f64 = -999.0;

/// An external spam scoring service.
#[async_trait::async_trait]
pub trait SpamScorer: Send + Sync {
    /// The score of the message, and an optional report.
    ///
    /// # Errors
    ///
    /// * the service cannot be reached or answered nonsense
    async fn score(&self, msg: &[u8]) -> anyhow::Result<(f64, Option<String>)>;
}

/// Outcome of the spam gate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpamVerdict {
    ///
    pub is_spam: bool,
    /// set when a scorer was used
    pub score: Option<f64>,
    /// The `X-Spam-Status` header when it was used.
    pub status: String,
    /// Report of the scorer, kept for spams only.
    pub report: Option<String>,
}

/// Read an `X-Spam-Status` header: `Yes|No, score=X required=Y tests=...`.
///
/// The message is a spam when the score reaches `max_score`, or when the
/// upstream filter said so.
#[must_use]
pub fn get_spam_from_header(spam_status: &str, max_score: Option<f64>) -> bool {
    let (answer, rest) = spam_status.split_once(',').unwrap_or((spam_status, ""));

    if let Some(max_score) = max_score {
        let score = rest
            .split_whitespace()
            .next()
            .and_then(|section| section.strip_prefix("score="))
            .and_then(|score| score.parse::<f64>().ok());

        match score {
            Some(score) if score >= max_score => {
                tracing::warn!(score, max_score, "Spam score exceeded.");
                return true;
            }
            Some(_) => {}
            None => tracing::warn!(%spam_status, "Cannot read the spam score."),
        }
    }

    answer.trim().eq_ignore_ascii_case("yes")
}

/// The message a spam report wraps, the first `message/rfc822` part.
#[must_use]
pub fn get_orig_message_from_spam_report(msg: &Mail) -> Option<&Mail> {
    msg.walk()
        .into_iter()
        .find(|part| part.content_type() == "message/rfc822")
        .and_then(|part| match &part.body {
            Body::Embedded(original) => Some(original.as_ref()),
            _ => None,
        })
}

impl RelayContext {
    async fn score_with_retry(&self, scorer: &dyn SpamScorer, raw: &[u8]) -> (f64, Option<String>) {
        for attempt in 0..2 {
            match scorer.score(raw).await {
                Ok(result) => return result,
                Err(error) => tracing::warn!(%error, attempt, "Spam scorer failure."),
            }
        }
        (SCORE_ON_FAILURE, None)
    }

    /// Run the spam gate on a message.
    ///
    /// The scorer is used when there is one, and the message is a spam when its score is
    /// above `threshold`. Otherwise the `X-Spam-Status` header is read with `header_max_score`.
    pub async fn check_spam(
        &self,
        msg: &Mail,
        threshold: f64,
        header_max_score: Option<f64>,
    ) -> SpamVerdict {
        if !self.config.app.spam.enabled {
            return SpamVerdict::default();
        }

        if let Some(scorer) = &self.spam {
            let start = std::time::Instant::now();
            let (score, report) = self.score_with_retry(scorer.as_ref(), &msg.to_bytes()).await;
            tracing::debug!(score, elapsed = ?start.elapsed(), "Spam score computed.");

            let is_spam = score > threshold;
            return SpamVerdict {
                is_spam,
                score: Some(score),
                status: String::new(),
                report: if is_spam { report } else { None },
            };
        }

        match msg.get_header("X-Spam-Status") {
            Some(status) => SpamVerdict {
                is_spam: get_spam_from_header(status, header_max_score),
                score: None,
                status: status.to_string(),
                report: None,
            },
            None => SpamVerdict::default(),
        }
    }

    /// Keep the spam out of the mailbox: store it, annotate the log and tell the owner.
    ///
    /// # Errors
    ///
    /// * the store failed
    #[allow(clippy::too_many_arguments)]
    pub async fn handle_spam(
        &self,
        contact: &Contact,
        alias: &Alias,
        msg: &Mail,
        user: &User,
        mailbox: &Mailbox,
        email_log: &mut EmailLog,
        verdict: &SpamVerdict,
        is_reply: bool,
    ) -> HandlerResult<()> {
        let original = get_orig_message_from_spam_report(msg).map(Mail::to_bytes);
        let refused_email = self
            .store
            .create_refused_email(user.id, original, msg.to_bytes())
            .await?;

        email_log.is_spam = true;
        email_log.spam_score = verdict.score;
        email_log.spam_status = Some(verdict.status.clone());
        email_log.spam_report = verdict.report.clone();
        email_log.refused_email_id = Some(refused_email.id);
        self.store.update_email_log(email_log).await?;

        let refused_email_url = format!(
            "{}/dashboard/refused_email?highlight_id={}",
            self.config.app.url, email_log.id
        );
        let context = [
            ("alias", alias.email.as_str()),
            ("website", contact.website_email.as_str()),
            ("refused_email_url", refused_email_url.as_str()),
        ];

        let (subject, template) = if is_reply {
            tracing::info!(alias = %alias.email, contact = %contact.website_email, "Spam sent from alias.");
            (
                format!(
                    "Email from {} to {} is detected as spam",
                    alias.email, contact.website_email
                ),
                Template::SpamReply,
            )
        } else {
            tracing::info!(alias = %alias.email, contact = %contact.website_email, "Spam sent to alias.");
            (
                format!(
                    "Email from {} to {} is detected as spam",
                    contact.website_email, alias.email
                ),
                Template::SpamForward,
            )
        };

        self.notifier
            .send_with_rate_control(
                user.id,
                AlertType::Spam,
                &Notification::new(
                    &mailbox.email,
                    subject,
                    self.renderer.render(template, &context),
                ),
                self.config.app.alerts.max_per_day,
                1,
                false,
            )
            .await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{get_orig_message_from_spam_report, get_spam_from_header};
    use aliasrelay_mail_parser::Mail;

    #[rstest::rstest]
    #[case("No, score=-0.1 required=5.0 tests=DKIM_SIGNED", Some(5.0), false)]
    #[case("No, score=8.2 required=5.0 tests=DKIM_SIGNED", Some(5.0), true)]
    #[case("No, score=5.0 required=5.0", Some(5.0), true)]
    #[case("Yes, score=3.0 required=5.0", Some(5.0), true)]
    #[case("yes, score=3.0 required=5.0", None, true)]
    #[case("No, score=8.2 required=5.0", None, false)]
    #[case("No, garbage", Some(5.0), false)]
    fn header(#[case] status: &str, #[case] max_score: Option<f64>, #[case] expected: bool) {
        assert_eq!(get_spam_from_header(status, max_score), expected);
    }

    #[test]
    fn original_of_report() {
        let report = [
            "Content-Type: multipart/mixed; boundary=\"b\"",
            "",
            "--b",
            "Content-Type: text/plain",
            "",
            "Spam detection report",
            "--b",
            "Content-Type: message/rfc822",
            "",
            "Subject: original",
            "",
            "hello",
            "--b--",
            "",
        ]
        .join("\r\n");

        let mail = report.parse::<Mail>().unwrap();
        let original = get_orig_message_from_spam_report(&mail).unwrap();
        assert_eq!(original.get_header("Subject"), Some("original"));

        assert!(get_orig_message_from_spam_report(&"Subject: x\r\n\r\nbody".parse::<Mail>().unwrap())
            .is_none());
    }
}
