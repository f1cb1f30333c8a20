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
use crate::{Body, Mail};

const SEPARATOR: &str = "------------------------------";

fn html_banner(banner: &str, content: &str) -> String {
    format!(
        r#"<table width="100%" style="width: 100%; -premailer-width: 100%; -premailer-cellpadding: 0;
  -premailer-cellspacing: 0; margin: 0; padding: 0;">
    <tr>
        <td style="border-bottom:1px dashed #5675E2; padding: 10px 0px">{banner}</td>
    </tr>
    <tr>
        <td>
        {content}
        </td>
    </tr>
</table>
"#
    )
}

impl Mail {
    /// Add a warning banner on top of the message, and optionally prefix the subject.
    ///
    /// * `text/plain` and `text/html` leaves get the banner,
    /// * every part of `multipart/alternative` and `multipart/related`,
    /// * only the first part of `multipart/mixed` and `multipart/signed`,
    /// * other types are left untouched.
    pub fn add_banner(&mut self, text: &str, html: Option<&str>, subject_prefix: Option<&str>) {
        if let Some(prefix) = subject_prefix {
            let subject = match self.get_header("Subject") {
                Some(subject) if !subject.trim().is_empty() => format!("{prefix} {subject}"),
                _ => prefix.to_string(),
            };
            self.add_or_replace_header("Subject", &subject);
        }

        let html = html.map_or_else(|| text.replace('\n', "<br>"), str::to_string);
        self.add_banner_inner(text, &html);
    }

    fn add_banner_inner(&mut self, text: &str, html: &str) {
        let content_type = self.content_type();
        let is_leaf = matches!(self.body, Body::Regular(_));

        match content_type.as_str() {
            "text/plain" if is_leaf => {
                self.map_text(|payload| format!("{text}\n{SEPARATOR}\n{payload}"));
            }
            "text/html" if is_leaf => self.map_text(|payload| html_banner(html, payload)),
            "multipart/alternative" | "multipart/related" => {
                for part in self.parts_mut() {
                    part.add_banner_inner(text, html);
                }
            }
            "multipart/mixed" | "multipart/signed" if is_leaf => {
                // badly formatted, inject the banner as a new part
                let payload = match &self.body {
                    Body::Regular(raw) => String::from_utf8_lossy(raw).to_string(),
                    _ => String::new(),
                };
                let text_part = |content: &str| {
                    Self::new(
                        vec![(
                            "Content-Type".to_string(),
                            "text/plain; charset=\"utf-8\"".to_string(),
                        )],
                        crate::TransferEncoding::EightBit.encode(content),
                    )
                };
                let container =
                    Self::new_multipart("mixed", &[], vec![text_part(text), text_part(&payload)]);
                self.delete_header("Content-Transfer-Encoding");
                self.add_or_replace_header(
                    "Content-Type",
                    container.get_header("Content-Type").unwrap_or_default(),
                );
                self.body = container.body;
            }
            "multipart/mixed" | "multipart/signed" => {
                tracing::debug!("only add the banner to the first part of {content_type}");
                if let Some(first) = self.parts_mut().first_mut() {
                    first.add_banner_inner(text, html);
                }
            }
            _ => tracing::debug!("No banner added for {content_type}"),
        }
    }

    fn map_text(&mut self, f: impl FnOnce(&str) -> String) {
        match self.decoded_text() {
            Ok(payload) => self.set_decoded_text(&f(&payload)),
            Err(error) => tracing::warn!(%error, "Cannot decode the text part, left untouched."),
        }
    }

    fn map_text_if(&mut self, old: &str, new: &str) {
        match self.decoded_text() {
            Ok(payload) if payload.contains(old) => {
                self.set_decoded_text(&payload.replace(old, new));
            }
            Ok(_) => {}
            Err(error) => tracing::warn!(%error, "Cannot decode payload, replace skipped."),
        }
    }

    /// Replace a text in the `text/plain` and `text/html` leaves, through the
    /// multiparts and the embedded messages.
    ///
    /// Attachments, calendars and signed parts are never modified.
    pub fn replace(&mut self, old: &str, new: &str) {
        let content_type = self.content_type();

        if ["image/", "video/", "audio/", "application/"]
            .iter()
            .any(|prefix| content_type.starts_with(prefix))
            || [
                "multipart/signed",
                "text/calendar",
                "text/directory",
                "text/csv",
                "text/x-python-script",
            ]
            .contains(&content_type.as_str())
        {
            tracing::debug!("replace not applicable for {content_type}");
            return;
        }

        match (content_type.as_str(), &mut self.body) {
            (
                "multipart/alternative" | "multipart/related" | "multipart/mixed",
                Body::Multipart { parts, .. },
            ) => {
                for part in parts {
                    part.replace(old, new);
                }
            }
            ("message/rfc822", Body::Embedded(embedded)) => embedded.replace(old, new),
            ("text/plain" | "text/html", Body::Regular(_)) => self.map_text_if(old, new),
            _ => tracing::warn!("Cannot replace text for {content_type}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{Mail, TransferEncoding};

    fn text(content_type: &str, encoding: TransferEncoding, body: &str) -> Mail {
        Mail::new(
            vec![
                ("Content-Type".to_string(), content_type.to_string()),
                (
                    "Content-Transfer-Encoding".to_string(),
                    encoding.as_str().to_string(),
                ),
            ],
            encoding.encode(body),
        )
    }

    #[rstest::rstest]
    #[case(TransferEncoding::SevenBit)]
    #[case(TransferEncoding::QuotedPrintable)]
    #[case(TransferEncoding::Base64)]
    fn banner_plain(#[case] encoding: TransferEncoding) {
        let mut mail = text("text/plain", encoding, "hello");
        mail.add_banner("WARNING", None, Some("[SPAM]"));

        pretty_assertions::assert_eq!(
            mail.decoded_text().unwrap(),
            "WARNING\r\n------------------------------\r\nhello"
        );
        assert_eq!(mail.get_header("Subject"), Some("[SPAM]"));
        assert_eq!(mail.transfer_encoding(), encoding);
    }

    #[test]
    fn banner_html() {
        let mut mail = text("text/html", TransferEncoding::SevenBit, "<p>hi</p>");
        mail.add_banner("line1\nline2", None, None);
        let html = mail.decoded_text().unwrap();
        assert!(html.contains("line1<br>line2"));
        assert!(html.contains("<p>hi</p>"));
    }

    #[test]
    fn banner_alternative_and_mixed() {
        let alternative = Mail::new_multipart(
            "alternative",
            &[],
            vec![
                text("text/plain", TransferEncoding::SevenBit, "plain"),
                text("text/html", TransferEncoding::SevenBit, "<b>html</b>"),
            ],
        );
        let mut mixed = Mail::new_multipart(
            "mixed",
            &[],
            vec![
                alternative,
                text("text/plain", TransferEncoding::SevenBit, "attachment"),
            ],
        );
        mixed.add_banner("BANNER", None, None);

        let leaves = mixed
            .walk()
            .into_iter()
            .filter(|p| !p.is_multipart())
            .map(|p| p.decoded_text().unwrap())
            .collect::<Vec<_>>();

        assert!(leaves[0].starts_with("BANNER"));
        assert!(leaves[1].contains("BANNER"));
        assert_eq!(leaves[2], "attachment");
    }

    #[test]
    fn banner_untouched() {
        let mut mail = text("image/png", TransferEncoding::Base64, "not really a png");
        let before = mail.clone();
        mail.add_banner("BANNER", None, None);
        assert_eq!(mail, before);
    }

    #[rstest::rstest]
    #[case(TransferEncoding::SevenBit)]
    #[case(TransferEncoding::QuotedPrintable)]
    #[case(TransferEncoding::Base64)]
    fn replace_text(#[case] encoding: TransferEncoding) {
        let mut mail = Mail::new_multipart(
            "mixed",
            &[],
            vec![
                text("text/plain", encoding, "reply to ra+abc@sl.example.com please"),
                text("text/calendar", encoding, "ra+abc@sl.example.com"),
            ],
        );
        mail.replace("ra+abc@sl.example.com", "john@example.com");

        assert_eq!(
            mail.parts()[0].decoded_text().unwrap(),
            "reply to john@example.com please"
        );
        assert_eq!(
            mail.parts()[1].decoded_text().unwrap(),
            "ra+abc@sl.example.com"
        );
    }
}
