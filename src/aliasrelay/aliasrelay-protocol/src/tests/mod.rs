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
use crate::{
    AcceptArgs, AuthArgs, AuthError, ConnectionKind, Credentials, EhloArgs, Error, HeloArgs,
    MailFromArgs, RcptToArgs, Receiver, ReceiverContext, ReceiverHandler, ReceiverLimits, Stage,
};
use aliasrelay_common::{CodeID, Reply};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_stream::StreamExt;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct Received {
    mail_from: Option<String>,
    mail_options: Vec<String>,
    rcpt: Vec<String>,
    body: Vec<u8>,
}

struct Recorder {
    stage: Stage,
    current: Received,
    messages: std::sync::Arc<std::sync::Mutex<Vec<Received>>>,
}

impl Recorder {
    fn new() -> (Self, std::sync::Arc<std::sync::Mutex<Vec<Received>>>) {
        let messages = std::sync::Arc::new(std::sync::Mutex::new(vec![]));
        (
            Self {
                stage: Stage::Connect,
                current: Received::default(),
                messages: messages.clone(),
            },
            messages,
        )
    }
}

fn reply(code: CodeID) -> Reply {
    match code {
        CodeID::Greetings => "220 test Service ready\r\n",
        CodeID::Closing => "221 Service closing transmission channel\r\n",
        CodeID::DataStart => "354 Start mail input; end with <CRLF>.<CRLF>\r\n",
        CodeID::AuthSucceeded => "235 2.7.0 Authentication succeeded\r\n",
        CodeID::AuthInvalidCredentials => "535 5.7.8 Authentication credentials invalid\r\n",
        CodeID::AuthMechNotSupported => "504 5.5.4 Mechanism not supported\r\n",
        CodeID::AuthClientCanceled => "501 Authentication canceled by client\r\n",
        CodeID::BadSequence => "503 Bad sequence of commands\r\n",
        CodeID::UnrecognizedCommand => "500 Syntax error command unrecognized\r\n",
        CodeID::Unimplemented => "502 Command not implemented\r\n",
        CodeID::SyntaxErrorParams => "501 Syntax error in parameters or arguments\r\n",
        CodeID::MessageSizeExceeded => "552 4.3.1 Message size exceeds fixed maximum message size\r\n",
        CodeID::TooManyError => "451 Too many errors from the client\r\n",
        CodeID::Timeout => "451 Timeout - closing connection\r\n",
        _ => "250 Ok\r\n",
    }
    .parse()
    .unwrap()
}

#[async_trait::async_trait]
impl ReceiverHandler for Recorder {
    fn get_stage(&self) -> Stage {
        self.stage
    }

    fn reply(&self, code: CodeID) -> Reply {
        reply(code)
    }

    async fn on_accept(&mut self, _: &mut ReceiverContext, _: AcceptArgs) -> Reply {
        reply(CodeID::Greetings)
    }

    async fn on_auth(&mut self, ctx: &mut ReceiverContext, args: AuthArgs) -> Option<Reply> {
        ctx.authenticate(args.mechanism, args.initial_response);
        None
    }

    async fn on_post_auth(
        &mut self,
        _: &mut ReceiverContext,
        result: Result<Credentials, AuthError>,
    ) -> Reply {
        match result {
            Ok(credentials)
                if credentials.authid == "user@sl.example.com"
                    && credentials.authpass == "secret" =>
            {
                reply(CodeID::AuthSucceeded)
            }
            Ok(_) => reply(CodeID::AuthInvalidCredentials),
            Err(AuthError::Canceled) => reply(CodeID::AuthClientCanceled),
            Err(_) => reply(CodeID::AuthErrorDecode64),
        }
    }

    async fn on_helo(&mut self, _: &mut ReceiverContext, _: HeloArgs) -> Reply {
        self.stage = Stage::Helo;
        reply(CodeID::Helo)
    }

    async fn on_ehlo(&mut self, _: &mut ReceiverContext, _: EhloArgs) -> Reply {
        self.stage = Stage::Helo;
        reply(CodeID::EhloSubmission)
    }

    async fn on_mail_from(&mut self, _: &mut ReceiverContext, args: MailFromArgs) -> Reply {
        self.stage = Stage::MailFrom;
        self.current = Received {
            mail_from: args.reverse_path,
            mail_options: args.mail_options,
            ..Received::default()
        };
        reply(CodeID::Ok)
    }

    async fn on_rcpt_to(&mut self, _: &mut ReceiverContext, args: RcptToArgs) -> Reply {
        self.stage = Stage::RcptTo;
        self.current.rcpt.push(args.forward_path);
        reply(CodeID::Ok)
    }

    async fn on_message(
        &mut self,
        _: &mut ReceiverContext,
        mut stream: impl tokio_stream::Stream<Item = Result<Vec<u8>, Error>> + Send + Unpin,
    ) -> Reply {
        self.stage = Stage::Helo;
        let mut message = std::mem::take(&mut self.current);
        let mut too_long = false;
        while let Some(line) = stream.next().await {
            match line {
                Ok(line) => message.body.extend_from_slice(&line),
                Err(Error::BufferTooLong { .. }) => too_long = true,
                Err(Error::Io(e)) => panic!("{e}"),
            }
        }
        if too_long {
            return reply(CodeID::MessageSizeExceeded);
        }
        self.messages.lock().unwrap().push(message);
        reply(CodeID::Ok)
    }

    async fn on_hard_error(&mut self, ctx: &mut ReceiverContext, _: Reply) -> Reply {
        ctx.deny();
        reply(CodeID::TooManyError)
    }

    async fn on_soft_error(&mut self, _: &mut ReceiverContext, reply: Reply) -> Reply {
        reply
    }

    async fn on_rset(&mut self) -> Reply {
        if self.stage != Stage::Connect {
            self.stage = Stage::Helo;
        }
        self.current = Received::default();
        reply(CodeID::Ok)
    }
}

fn limits() -> ReceiverLimits {
    ReceiverLimits {
        threshold_soft_error: -1,
        threshold_hard_error: -1,
        message_size_max: 1000,
        command_timeout: std::time::Duration::from_secs(5),
        auth_timeout: std::time::Duration::from_secs(5),
    }
}

async fn run(script: &str, limits: ReceiverLimits) -> (String, Vec<Received>) {
    let (recorder, messages) = Recorder::new();
    let (mut client, server) = tokio::io::duplex(1 << 16);
    client.write_all(script.as_bytes()).await.unwrap();

    {
        let (read, write) = tokio::io::split(server);
        let addr = "127.0.0.1:25".parse().unwrap();
        let stream = Receiver::with_io(read, write, ConnectionKind::Submission, recorder, limits)
            .into_stream(
                addr,
                addr,
                time::OffsetDateTime::now_utc(),
                uuid::Uuid::new_v4(),
            );
        tokio::pin!(stream);
        while let Some(item) = stream.next().await {
            item.unwrap();
        }
    }

    let mut output = String::new();
    client.read_to_string(&mut output).await.unwrap();
    let messages = messages.lock().unwrap().clone();
    (output, messages)
}

#[test_log::test(tokio::test)]
async fn relay_transaction() {
    let (output, messages) = run(
        concat!(
            "EHLO client.example.com\r\n",
            "MAIL FROM:<sender@example.org> BODY=8BITMIME\r\n",
            "RCPT TO:<alias@sl.example.com>\r\n",
            "RCPT TO:<other@sl.example.com>\r\n",
            "DATA\r\n",
            "Subject: hi\r\n",
            "\r\n",
            "..dot\r\n",
            ".\r\n",
            "QUIT\r\n",
        ),
        limits(),
    )
    .await;

    pretty_assertions::assert_eq!(
        output,
        concat!(
            "220 test Service ready\r\n",
            "250 Ok\r\n",
            "250 Ok\r\n",
            "250 Ok\r\n",
            "250 Ok\r\n",
            "354 Start mail input; end with <CRLF>.<CRLF>\r\n",
            "250 Ok\r\n",
            "221 Service closing transmission channel\r\n",
        )
    );
    pretty_assertions::assert_eq!(
        messages,
        vec![Received {
            mail_from: Some("sender@example.org".to_string()),
            mail_options: vec!["BODY=8BITMIME".to_string()],
            rcpt: vec![
                "alias@sl.example.com".to_string(),
                "other@sl.example.com".to_string()
            ],
            body: b"Subject: hi\r\n\r\n.dot\r\n".to_vec(),
        }]
    );
}

#[tokio::test]
async fn two_messages_null_sender() {
    let (_, messages) = run(
        concat!(
            "HELO mx\r\n",
            "MAIL FROM:<>\r\n",
            "RCPT TO:<a@sl.example.com>\r\n",
            "DATA\r\n",
            "first\r\n",
            ".\r\n",
            "MAIL FROM:<b@example.org>\r\n",
            "RCPT TO:<c@sl.example.com>\r\n",
            "DATA\r\n",
            "second\r\n",
            ".\r\n",
            "QUIT\r\n",
        ),
        limits(),
    )
    .await;

    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].mail_from, None);
    assert_eq!(messages[1].mail_from.as_deref(), Some("b@example.org"));
    assert_eq!(messages[1].body, b"second\r\n");
}

#[rstest::rstest]
#[case::rcpt_before_mail(
    "EHLO x\r\nRCPT TO:<a@b.c>\r\nQUIT\r\n",
    "220 test Service ready\r\n250 Ok\r\n503 Bad sequence of commands\r\n221 Service closing transmission channel\r\n"
)]
#[case::mail_before_ehlo(
    "MAIL FROM:<a@b.c>\r\nQUIT\r\n",
    "220 test Service ready\r\n503 Bad sequence of commands\r\n221 Service closing transmission channel\r\n"
)]
#[case::unknown_and_unimplemented(
    "FOO\r\nVRFY a\r\nQUIT\r\n",
    "220 test Service ready\r\n500 Syntax error command unrecognized\r\n502 Command not implemented\r\n221 Service closing transmission channel\r\n"
)]
#[case::invalid_path(
    "EHLO x\r\nMAIL FROM:a@b.c\r\nQUIT\r\n",
    "220 test Service ready\r\n250 Ok\r\n501 Syntax error in parameters or arguments\r\n221 Service closing transmission channel\r\n"
)]
#[case::auth_plain(
    "EHLO x\r\nAUTH PLAIN AHVzZXJAc2wuZXhhbXBsZS5jb20Ac2VjcmV0\r\nQUIT\r\n",
    "220 test Service ready\r\n250 Ok\r\n235 2.7.0 Authentication succeeded\r\n221 Service closing transmission channel\r\n"
)]
#[case::auth_plain_challenge(
    "EHLO x\r\nAUTH PLAIN\r\nAHVzZXJAc2wuZXhhbXBsZS5jb20Ac2VjcmV0\r\nQUIT\r\n",
    "220 test Service ready\r\n250 Ok\r\n334 \r\n235 2.7.0 Authentication succeeded\r\n221 Service closing transmission channel\r\n"
)]
#[case::auth_login(
    "EHLO x\r\nAUTH LOGIN\r\ndXNlckBzbC5leGFtcGxlLmNvbQ==\r\nc2VjcmV0\r\nQUIT\r\n",
    "220 test Service ready\r\n250 Ok\r\n334 VXNlcm5hbWU6\r\n334 UGFzc3dvcmQ6\r\n235 2.7.0 Authentication succeeded\r\n221 Service closing transmission channel\r\n"
)]
#[case::auth_wrong_password(
    "EHLO x\r\nAUTH LOGIN dXNlckBzbC5leGFtcGxlLmNvbQ==\r\nd3Jvbmc=\r\nQUIT\r\n",
    "220 test Service ready\r\n250 Ok\r\n334 UGFzc3dvcmQ6\r\n535 5.7.8 Authentication credentials invalid\r\n221 Service closing transmission channel\r\n"
)]
#[case::auth_canceled(
    "EHLO x\r\nAUTH PLAIN\r\n*\r\nQUIT\r\n",
    "220 test Service ready\r\n250 Ok\r\n334 \r\n501 Authentication canceled by client\r\n221 Service closing transmission channel\r\n"
)]
#[case::auth_unsupported(
    "EHLO x\r\nAUTH CRAM-MD5\r\nQUIT\r\n",
    "220 test Service ready\r\n250 Ok\r\n504 5.5.4 Mechanism not supported\r\n221 Service closing transmission channel\r\n"
)]
#[tokio::test]
async fn dialog(#[case] script: &str, #[case] expected: &str) {
    let (output, _) = run(script, limits()).await;
    pretty_assertions::assert_eq!(output, expected);
}

#[tokio::test]
async fn hard_error_closes() {
    let (output, _) = run(
        "FOO\r\nBAR\r\nQUIT\r\n",
        ReceiverLimits {
            threshold_hard_error: 2,
            ..limits()
        },
    )
    .await;

    pretty_assertions::assert_eq!(
        output,
        concat!(
            "220 test Service ready\r\n",
            "500 Syntax error command unrecognized\r\n",
            "451 Too many errors from the client\r\n",
        )
    );
}

#[tokio::test]
async fn message_too_long() {
    let (output, messages) = run(
        "EHLO x\r\nMAIL FROM:<a@b.c>\r\nRCPT TO:<d@e.f>\r\nDATA\r\n0123456789\r\n0123456789\r\n.\r\nQUIT\r\n",
        ReceiverLimits {
            message_size_max: 15,
            ..limits()
        },
    )
    .await;

    assert!(messages.is_empty());
    assert!(output.contains("552 4.3.1 Message size exceeds fixed maximum message size\r\n221"));
}

#[tokio::test]
async fn command_timeout() {
    let (recorder, _) = Recorder::new();
    let (mut client, server) = tokio::io::duplex(1 << 10);

    {
        let (read, write) = tokio::io::split(server);
        let addr = "127.0.0.1:25".parse().unwrap();
        let stream = Receiver::with_io(
            read,
            write,
            ConnectionKind::Relay,
            recorder,
            ReceiverLimits {
                command_timeout: std::time::Duration::from_millis(50),
                ..limits()
            },
        )
        .into_stream(addr, addr, time::OffsetDateTime::now_utc(), uuid::Uuid::new_v4());
        tokio::pin!(stream);
        while stream.next().await.is_some() {}
    }

    let mut output = String::new();
    client.read_to_string(&mut output).await.unwrap();
    assert_eq!(
        output,
        "220 test Service ready\r\n451 Timeout - closing connection\r\n"
    );
}
