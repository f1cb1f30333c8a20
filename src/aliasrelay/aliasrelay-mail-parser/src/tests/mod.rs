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
use crate::{Body, Mail, MailParser, MimeParser};


fn parse(raw: &str) -> Mail {
    MimeParser::default().parse_sync(raw.as_bytes()).unwrap()
}

#[test]
fn simple_round_trip() {
    let raw = concat!(
        "From: john <john@example.com>\r\n",
        "To: green@example.com\r\n",
        "Subject: test message\r\n",
        "Content-Type: text/plain; charset=UTF-8\r\n",
        "\r\n",
        "only plain text here\r\n",
        "and a second line\r\n",
    );
    let mail = parse(raw);

    pretty_assertions::assert_eq!(
        mail,
        Mail {
            headers: crate::MailHeaders(
                [
                    ("From", "john <john@example.com>"),
                    ("To", "green@example.com"),
                    ("Subject", "test message"),
                    ("Content-Type", "text/plain; charset=UTF-8"),
                ]
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect()
            ),
            body: Body::Regular(b"only plain text here\r\nand a second line\r\n".to_vec()),
        }
    );
    pretty_assertions::assert_eq!(String::from_utf8(mail.to_bytes()).unwrap(), raw);
}

#[test]
fn multipart_round_trip() {
    let raw = concat!(
        "From: john@example.com\r\n",
        "Content-Type: multipart/alternative; boundary=\"xyz\"\r\n",
        "\r\n",
        "preamble\r\n",
        "--xyz\r\n",
        "Content-Type: text/plain\r\n",
        "\r\n",
        "plain\r\n",
        "--xyz\r\n",
        "Content-Type: text/html\r\n",
        "\r\n",
        "<b>html</b>\r\n",
        "--xyz--\r\n",
        "epilogue\r\n",
    );
    let mail = parse(raw);

    assert!(mail.is_multipart());
    assert_eq!(mail.parts().len(), 2);
    assert_eq!(mail.parts()[1].content_type(), "text/html");
    assert_eq!(mail.parts()[1].decoded_text().unwrap(), "<b>html</b>");
    pretty_assertions::assert_eq!(String::from_utf8(mail.to_bytes()).unwrap(), raw);
}

#[test]
fn folded_header_is_unfolded() {
    let mail = parse("Subject: a very\r\n long subject\r\n\r\nbody");
    assert_eq!(mail.get_header("subject"), Some("a very long subject"));
}

#[test]
fn multipart_without_boundary() {
    let mail = parse("Content-Type: multipart/mixed\r\n\r\nbody\r\n");
    assert!(!mail.is_multipart());
    assert_eq!(mail.body, Body::Regular(b"body\r\n".to_vec()));
}

#[test]
fn from_str_and_display() {
    let mail = "Subject: hi\r\n\r\nhello\r\n".parse::<Mail>().unwrap();
    assert_eq!(mail.to_string(), "Subject: hi\r\n\r\nhello\r\n");
}

#[tokio::test]
async fn parse_stream_of_lines() {
    let lines = ["Subject: hi\r\n", "X-Id: 1\r\n", "\r\n", "hello\r\n"]
        .into_iter()
        .map(|l| l.as_bytes().to_vec())
        .collect::<Vec<_>>();

    let mail = MimeParser::default()
        .parse(tokio_stream::iter(lines))
        .await
        .unwrap();

    assert_eq!(mail.get_header("x-id"), Some("1"));
    assert_eq!(mail.decoded_text().unwrap(), "hello\r\n");
}
