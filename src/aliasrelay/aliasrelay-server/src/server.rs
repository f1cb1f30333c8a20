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
use crate::Handler;
use aliasrelay_common::CodeID;
use aliasrelay_config::Config;
use aliasrelay_handler::{RelayContext, SubmissionAuthenticator};
use aliasrelay_protocol::{ConnectionKind, Receiver, ReceiverLimits};
use anyhow::Context;

/// TCP/IP server
pub struct Server {
    config: std::sync::Arc<Config>,
    context: std::sync::Arc<RelayContext>,
    authenticator: SubmissionAuthenticator,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.config.server.name)
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

/// Create a `TCPListener` ready to be listened to
///
/// # Errors
///
/// * failed to bind to the socket address
/// * failed to set the listener to non blocking
pub fn socket_bind_anyhow<A: std::net::ToSocketAddrs + std::fmt::Debug>(
    addr: A,
) -> anyhow::Result<std::net::TcpListener> {
    let socket = std::net::TcpListener::bind(&addr)
        .with_context(|| format!("Failed to bind socket on addr: '{addr:?}'"))?;

    socket
        .set_nonblocking(true)
        .with_context(|| format!("Failed to set non-blocking socket on addr: '{addr:?}'"))?;

    Ok(socket)
}

type ListenerStreamItem = std::io::Result<(tokio::net::TcpStream, std::net::SocketAddr)>;

fn listener_to_stream(
    listener: &tokio::net::TcpListener,
) -> impl tokio_stream::Stream<Item = ListenerStreamItem> + '_ {
    async_stream::try_stream! {
        loop {
            let client = listener.accept().await?;
            yield client;
        }
    }
}

impl Server {
    /// Create a server relaying the messages with `context`.
    #[must_use]
    pub fn new(config: std::sync::Arc<Config>, context: std::sync::Arc<RelayContext>) -> Self {
        Self {
            authenticator: SubmissionAuthenticator::new(context.store.clone()),
            context,
            config,
        }
    }

    fn limits(&self) -> ReceiverLimits {
        ReceiverLimits {
            threshold_soft_error: self.config.server.smtp.error.soft_count,
            threshold_hard_error: self.config.server.smtp.error.hard_count,
            message_size_max: self.config.server.message_size_limit,
            command_timeout: self.config.server.smtp.timeout_client.command,
            auth_timeout: self.config.server.smtp.timeout_client.auth,
        }
    }

    #[tracing::instrument(name = "handle-client", skip_all, fields(client = %client_addr, server = %server_addr))]
    async fn handle_client(
        &self,
        client_counter: std::sync::Arc<std::sync::atomic::AtomicI64>,
        kind: ConnectionKind,
        mut stream: tokio::net::TcpStream,
        client_addr: std::net::SocketAddr,
        server_addr: std::net::SocketAddr,
    ) {
        tracing::info!(%kind, "Connection accepted.");

        if self.config.server.client_count_max != -1
            && client_counter.load(std::sync::atomic::Ordering::SeqCst)
                >= self.config.server.client_count_max
        {
            tracing::warn!(
                max = self.config.server.client_count_max,
                "Connection count max reached, rejecting connection.",
            );

            if let Some(reply) = self
                .config
                .server
                .smtp
                .codes
                .get(&CodeID::ConnectionMaxReached)
            {
                if let Err(error) =
                    tokio::io::AsyncWriteExt::write_all(&mut stream, reply.to_string().as_bytes())
                        .await
                {
                    tracing::error!(%error, "Code delivery failure.");
                }
            }

            if let Err(error) = tokio::io::AsyncWriteExt::shutdown(&mut stream).await {
                tracing::error!(%error, "Closing connection failure.");
            }
            return;
        }

        client_counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        let handler = Handler::new(
            self.config.clone(),
            self.context.clone(),
            self.authenticator.clone(),
            kind,
        );
        let session = Self::run_session(
            Receiver::new(stream, kind, handler, self.limits()),
            client_addr,
            server_addr,
        );
        tokio::spawn(async move {
            if let Err(error) = session.await {
                tracing::error!(%error, "Run session failure.");
            }

            client_counter.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
        });
    }

    /// Main loop of the relay: accept the clients of the relay and of the
    /// submission listeners, one task per connection.
    ///
    /// # Errors
    ///
    /// * failed to convert sockets to `[tokio::net::TcpListener]`
    /// * failed to accept a client
    #[tracing::instrument(name = "serve", skip_all)]
    pub async fn listen_and_serve(
        self,
        sockets: (Vec<std::net::TcpListener>, Vec<std::net::TcpListener>),
    ) -> anyhow::Result<()> {
        fn to_tokio(
            s: Vec<std::net::TcpListener>,
        ) -> std::io::Result<Vec<tokio::net::TcpListener>> {
            s.into_iter()
                .map(tokio::net::TcpListener::from_std)
                .collect::<std::io::Result<Vec<tokio::net::TcpListener>>>()
        }

        let client_counter = std::sync::Arc::new(std::sync::atomic::AtomicI64::new(0));

        let (listener, listener_submission) = (to_tokio(sockets.0)?, to_tokio(sockets.1)?);

        let mut map = tokio_stream::StreamMap::new();
        for (kind, sockets) in [
            (ConnectionKind::Relay, &listener),
            (ConnectionKind::Submission, &listener_submission),
        ] {
            for listener in sockets {
                let accept = listener_to_stream(listener);
                let transform = tokio_stream::StreamExt::map(accept, move |client| (kind, client));

                map.insert(listener.local_addr()?, Box::pin(transform));
            }
        }

        tracing::info!(
            interfaces = ?map.keys().collect::<Vec<_>>(),
            "Listening for clients.",
        );

        while let Some((server_addr, (kind, client))) =
            tokio_stream::StreamExt::next(&mut map).await
        {
            let (stream, client_addr) = client?;

            self.handle_client(
                client_counter.clone(),
                kind,
                stream,
                client_addr,
                server_addr,
            )
            .await;
        }
        Ok(())
    }

    /// Drive the SMTP dialog of one connection to its end.
    ///
    /// # Errors
    ///
    /// * the connection failed
    pub async fn run_session(
        receiver: Receiver<Handler, tokio::net::tcp::OwnedWriteHalf, tokio::net::tcp::OwnedReadHalf>,
        client_addr: std::net::SocketAddr,
        server_addr: std::net::SocketAddr,
    ) -> anyhow::Result<()> {
        let uuid = uuid::Uuid::new_v4();
        let stream = receiver.into_stream(
            client_addr,
            server_addr,
            time::OffsetDateTime::now_utc(),
            uuid,
        );
        tokio::pin!(stream);

        let mut nb_messages = 0_usize;
        let connection_result = loop {
            match tokio_stream::StreamExt::next(&mut stream).await {
                Some(Ok(())) => nb_messages += 1,
                Some(Err(error)) => break Err(error),
                None => break Ok(()),
            }
        };

        match &connection_result {
            Ok(()) => {
                tracing::info!(%uuid, nb_messages, "Connection closed cleanly.");
            }
            Err(error) => {
                tracing::warn!(%uuid, %error, "Connection closing failure.");
            }
        }
        connection_result.map_err(anyhow::Error::new)
    }
}

#[cfg(test)]
mod tests {
    use crate::{socket_bind_anyhow, Server};
    use aliasrelay_config::Config;
    use aliasrelay_delivery::{Dispatcher, Recorder};
    use aliasrelay_handler::{
        hash_password,
        models::{Alias, Mailbox, SmtpCredentials, User},
        MemoryStore, RelayContext, Store, Tables,
    };
    use lettre::AsyncTransport;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn tables() -> Tables {
        Tables {
            users: vec![User {
                id: 1,
                email: "user@example.com".to_string(),
                default_mailbox_id: 1,
                enable_smtp_aliases: true,
                ..User::default()
            }],
            mailboxes: vec![Mailbox {
                id: 1,
                user_id: 1,
                email: "user@example.com".to_string(),
                verified: true,
                ..Mailbox::default()
            }],
            aliases: vec![Alias {
                id: 1,
                user_id: 1,
                email: "alias@sl.example.com".to_string(),
                mailbox_id: 1,
                ..Alias::default()
            }],
            ..Tables::default()
        }
    }

    struct Running {
        relay: std::net::SocketAddr,
        submission: std::net::SocketAddr,
        recorder: std::sync::Arc<Recorder>,
    }

    async fn start(client_count_max: i64) -> Running {
        let mut config = Config::with_email_domain("sl.example.com").unwrap();
        config.server.client_count_max = client_count_max;
        config.app.delivery.backoff = std::time::Duration::ZERO;
        let config = std::sync::Arc::new(config);

        let recorder = std::sync::Arc::new(Recorder::default());
        let store = std::sync::Arc::new(MemoryStore::new(tables()));
        store
            .set_smtp_credentials(SmtpCredentials {
                alias_id: 1,
                password_hash: hash_password("s3cr3t").unwrap(),
            })
            .await
            .unwrap();
        let context = std::sync::Arc::new(RelayContext::new(
            config.clone(),
            store,
            std::sync::Arc::new(Dispatcher::with_transport(
                &config.app.delivery,
                recorder.clone(),
            )),
        ));

        let relay = socket_bind_anyhow("127.0.0.1:0").unwrap();
        let submission = socket_bind_anyhow("127.0.0.1:0").unwrap();
        let running = Running {
            relay: relay.local_addr().unwrap(),
            submission: submission.local_addr().unwrap(),
            recorder,
        };

        let server = Server::new(config, context);
        tokio::spawn(async move {
            server
                .listen_and_serve((vec![relay], vec![submission]))
                .await
                .unwrap();
        });
        running
    }

    fn client(
        addr: std::net::SocketAddr,
    ) -> lettre::transport::smtp::AsyncSmtpTransportBuilder {
        lettre::AsyncSmtpTransport::<lettre::Tokio1Executor>::builder_dangerous(
            addr.ip().to_string(),
        )
        .port(addr.port())
        .hello_name(lettre::transport::smtp::extension::ClientId::Domain(
            "mx.world.com".to_string(),
        ))
    }

    fn envelope(from: &str, to: &str) -> lettre::address::Envelope {
        lettre::address::Envelope::new(Some(from.parse().unwrap()), vec![to.parse().unwrap()])
            .unwrap()
    }

    async fn dialog(addr: std::net::SocketAddr, script: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(script.as_bytes()).await.unwrap();
        let mut output = String::new();
        stream.read_to_string(&mut output).await.unwrap();
        output
    }

    #[test_log::test(tokio::test)]
    async fn relay_forward() {
        let running = start(-1).await;

        let response = client(running.relay)
            .build()
            .send_raw(
                &envelope("john@world.com", "alias@sl.example.com"),
                b"From: John <john@world.com>\r\nTo: alias@sl.example.com\r\nSubject: hi\r\n\r\nhello\r\n",
            )
            .await
            .unwrap();
        assert_eq!(response.code().to_string(), "250");
        assert_eq!(
            response.message().collect::<Vec<_>>(),
            vec!["Message accepted for delivery"]
        );

        let sent = running.recorder.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].envelope_to, "user@example.com");
    }

    #[tokio::test]
    async fn relay_unknown_alias() {
        let running = start(-1).await;

        let error = client(running.relay)
            .build()
            .send_raw(
                &envelope("john@world.com", "nobody@elsewhere.com"),
                b"Subject: hi\r\n\r\nhello\r\n",
            )
            .await
            .unwrap_err();
        assert!(error.is_permanent());
        assert!(running.recorder.sent().await.is_empty());
    }

    #[tokio::test]
    async fn submission_authenticated() {
        let running = start(-1).await;

        let response = client(running.submission)
            .credentials(lettre::transport::smtp::authentication::Credentials::new(
                "alias@sl.example.com".to_string(),
                "s3cr3t".to_string(),
            ))
            .authentication(vec![lettre::transport::smtp::authentication::Mechanism::Plain])
            .build()
            .send_raw(
                &envelope("alias@sl.example.com", "shop@world.com"),
                b"From: alias@sl.example.com\r\nTo: shop@world.com\r\nSubject: order\r\n\r\nhello\r\n",
            )
            .await
            .unwrap();
        assert!(response.is_positive());

        let sent = running.recorder.sent().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].envelope_to, "shop@world.com");
    }

    #[rstest::rstest]
    #[case::mail_before_auth(
        "EHLO x\r\nMAIL FROM:<alias@sl.example.com>\r\nQUIT\r\n",
        "530 5.7.0 Authentication required\r\n"
    )]
    #[case::wrong_password(
        // alias@sl.example.com / wrong
        "EHLO x\r\nAUTH PLAIN AGFsaWFzQHNsLmV4YW1wbGUuY29tAHdyb25n\r\nQUIT\r\n",
        "535 5.7.8 Authentication credentials invalid\r\n"
    )]
    #[case::spoofed(
        // alias@sl.example.com / s3cr3t
        "EHLO x\r\nAUTH PLAIN AGFsaWFzQHNsLmV4YW1wbGUuY29tAHMzY3IzdA==\r\nMAIL FROM:<alias@sl.example.com>\r\nRCPT TO:<shop@world.com>\r\nDATA\r\nFrom: other@sl.example.com\r\n\r\nhi\r\n.\r\nQUIT\r\n",
        "550 SL E509 unauthorized\r\n"
    )]
    #[tokio::test]
    async fn submission_refused(#[case] script: &str, #[case] expected: &str) {
        let running = start(-1).await;
        let output = dialog(running.submission, script).await;
        assert!(output.contains(expected), "{output}");
        assert!(running.recorder.sent().await.is_empty());
    }

    #[tokio::test]
    async fn no_auth_on_relay() {
        let running = start(-1).await;
        let output = dialog(running.relay, "EHLO x\r\nAUTH PLAIN\r\nQUIT\r\n").await;
        assert!(output.contains("502 Command not implemented\r\n"), "{output}");
        assert!(!output.contains("AUTH PLAIN LOGIN"));
    }

    #[tokio::test]
    async fn connection_max_reached() {
        let running = start(0).await;
        let output = dialog(running.relay, "QUIT\r\n").await;
        assert!(output.starts_with("554 "), "{output}");
    }
}
