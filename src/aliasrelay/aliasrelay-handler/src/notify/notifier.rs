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
use super::AlertType;
use crate::{
    models::{Id, SentAlert},
    verp::{VerpCodec, VerpType},
    Store,
};
use aliasrelay_delivery::{Dispatcher, SendRequest};
use aliasrelay_mail_parser::{Mail, TransferEncoding};
extern crate alloc;

/// A message for a user of the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    ///
    pub to: String,
    ///
    pub subject: String,
    /// The plain text body.
    pub text: String,
    /// An optional html alternative.
    pub html: Option<String>,
}

impl Notification {
    ///
    #[must_use]
    pub fn new(to: &str, subject: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            to: aliasrelay_common::utils::sanitize_email(to),
            subject: subject.into(),
            text: text.into(),
            html: None,
        }
    }
}

fn text_part(headers: Vec<(String, String)>, subtype: &str, text: &str) -> Mail {
    let encoding = if text.is_ascii() {
        TransferEncoding::SevenBit
    } else {
        TransferEncoding::QuotedPrintable
    };

    let mut headers = headers;
    headers.push((
        "Content-Type".to_string(),
        format!("text/{subtype}; charset=\"utf-8\""),
    ));
    headers.push((
        "Content-Transfer-Encoding".to_string(),
        encoding.as_str().to_string(),
    ));
    Mail::new(headers, encoding.encode(text))
}

/// Build and send the notifications, each one with its own transactional VERP sender.
///
/// A notification never fails the transaction which triggered it: the errors are
/// logged, and the dispatcher spools what it cannot deliver.
pub struct Notifier {
    dispatcher: alloc::sync::Arc<Dispatcher>,
    store: alloc::sync::Arc<dyn Store>,
    verp: alloc::sync::Arc<VerpCodec>,
    from: String,
    email_domain: String,
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

impl Notifier {
    ///
    #[must_use]
    pub fn new(
        app: &aliasrelay_config::field::FieldApp,
        dispatcher: alloc::sync::Arc<Dispatcher>,
        store: alloc::sync::Arc<dyn Store>,
        verp: alloc::sync::Arc<VerpCodec>,
    ) -> Self {
        Self {
            dispatcher,
            store,
            verp,
            from: aliasrelay_mail_parser::format_address(&app.support_name, &app.noreply()),
            email_domain: app.email_domain.clone(),
        }
    }

    /// The notification as it goes on the wire.
    #[must_use]
    pub fn build(&self, notification: &Notification) -> Mail {
        let headers = vec![
            (
                "Subject".to_string(),
                aliasrelay_mail_parser::encode_header_value(&notification.subject),
            ),
            ("From".to_string(), self.from.clone()),
            ("To".to_string(), notification.to.clone()),
            (
                "Message-ID".to_string(),
                format!("<{}@{}>", uuid::Uuid::new_v4(), self.email_domain),
            ),
            ("Date".to_string(), crate::transform::rfc2822_now()),
        ];

        match &notification.html {
            None => {
                let mut mail = text_part(headers, "plain", &notification.text);
                mail.add_header("MIME-Version", "1.0");
                mail
            }
            Some(html) => {
                let mut mail = Mail::new_multipart(
                    "alternative",
                    &[],
                    vec![
                        text_part(vec![], "plain", &notification.text),
                        text_part(vec![], "html", html),
                    ],
                );
                for (name, value) in headers.into_iter().rev() {
                    mail.prepend_header(&name, &value);
                }
                mail
            }
        }
    }

    /// Send a notification.
    ///
    /// Returns `false` when it could not be handed over, the error being logged.
    pub async fn send(&self, notification: &Notification, ignore_smtp_error: bool) -> bool {
        tracing::debug!(to = %notification.to, subject = %notification.subject, "Sending notification.");

        let envelope_from = match self.store.create_transactional_email(&notification.to).await {
            Ok(transactional) => {
                self.verp
                    .generate(VerpType::Transactional, transactional.id, None)
            }
            Err(error) => {
                tracing::error!(%error, "Cannot record the transactional email.");
                self.from_address()
            }
        };

        let mut request = SendRequest::new(
            envelope_from,
            notification.to.clone(),
            self.build(notification).to_bytes(),
        );
        if ignore_smtp_error {
            request = request.ignore_smtp_errors();
        }

        match self.dispatcher.send(request).await {
            Ok(()) => true,
            Err(error) if ignore_smtp_error => {
                tracing::warn!(%error, to = %notification.to, subject = %notification.subject, "Cannot send notification.");
                false
            }
            Err(error) => {
                tracing::error!(%error, to = %notification.to, subject = %notification.subject, "Cannot send notification.");
                false
            }
        }
    }

    fn from_address(&self) -> String {
        format!("noreply@{}", self.email_domain)
    }

    async fn record(&self, user_id: Id, alert: AlertType, to: &str) {
        if let Err(error) = self
            .store
            .create_sent_alert(SentAlert {
                user_id,
                alert_type: alert.to_string(),
                to_email: to.to_string(),
                created_at: time::OffsetDateTime::now_utc(),
            })
            .await
        {
            tracing::error!(%error, %alert, "Cannot record the alert.");
        }
    }

    /// Send the notification unless `max_nb_alert` alerts of this kind were sent to the
    /// same address in the last `nb_day` days.
    ///
    /// Returns `true` when the notification is sent.
    pub async fn send_with_rate_control(
        &self,
        user_id: Id,
        alert: AlertType,
        notification: &Notification,
        max_nb_alert: usize,
        nb_day: i64,
        ignore_smtp_error: bool,
    ) -> bool {
        let since = time::OffsetDateTime::now_utc() - time::Duration::days(nb_day);
        let nb_alert = self
            .store
            .count_sent_alerts(&alert.to_string(), &notification.to, Some(since))
            .await;

        if nb_alert >= max_nb_alert {
            tracing::warn!(
                nb_alert,
                to = %notification.to,
                nb_day,
                %alert,
                "Too many alerts sent, skipping."
            );
            return false;
        }

        self.record(user_id, alert, &notification.to).await;
        self.send(notification, ignore_smtp_error).await;
        true
    }

    /// Send the notification unless `max_times` alerts of this kind were ever sent to
    /// the same address.
    ///
    /// Returns `true` when the notification is sent.
    pub async fn send_at_most_times(
        &self,
        user_id: Id,
        alert: AlertType,
        notification: &Notification,
        max_times: usize,
    ) -> bool {
        let nb_alert = self
            .store
            .count_sent_alerts(&alert.to_string(), &notification.to, None)
            .await;

        if nb_alert >= max_times {
            tracing::warn!(nb_alert, to = %notification.to, %alert, "Alert already sent.");
            return false;
        }

        self.record(user_id, alert, &notification.to).await;
        self.send(notification, false).await;
        true
    }
}
