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
use crate::{DeliveryError, RetryPolicy, SendRequest, Sender, SenderParameters, Spool, Transport};
extern crate alloc;

/// Counters of a [`Dispatcher::resend_unsent`] run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResendReport {
    /// Delivered, the file is removed.
    pub delivered: usize,
    /// Failed again, kept for the next run.
    pub kept: usize,
    /// Failed too many times, moved to the `failed` directory.
    pub failed: usize,
    /// Files which could not be read.
    pub skipped: usize,
}

/// Send the requests with retries, and spool the ones failing every attempt.
pub struct Dispatcher {
    transport: alloc::sync::Arc<dyn Transport>,
    policy: RetryPolicy,
    attempt_timeout: std::time::Duration,
    spool: Option<Spool>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("policy", &self.policy)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("spool", &self.spool)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    ///
    #[must_use]
    pub fn new(
        transport: alloc::sync::Arc<dyn Transport>,
        policy: RetryPolicy,
        attempt_timeout: std::time::Duration,
        spool: Option<Spool>,
    ) -> Self {
        Self {
            transport,
            policy,
            attempt_timeout,
            spool,
        }
    }

    /// Dispatcher of the `[app.delivery]` table, with the given transport.
    #[must_use]
    pub fn with_transport(
        delivery: &aliasrelay_config::field::FieldAppDelivery,
        transport: alloc::sync::Arc<dyn Transport>,
    ) -> Self {
        Self::new(
            transport,
            RetryPolicy {
                max_attempts: delivery.max_attempts,
                backoff: delivery.backoff,
            },
            delivery.timeout,
            delivery.unsent_dir.clone().map(Spool::new),
        )
    }

    /// Dispatcher of the `[app.delivery]` table, relaying to the configured MTA.
    #[must_use]
    pub fn from_config(
        delivery: &aliasrelay_config::field::FieldAppDelivery,
        hello_name: &str,
    ) -> Self {
        Self::with_transport(
            delivery,
            alloc::sync::Arc::new(Sender::new(SenderParameters::from_config(
                delivery, hello_name,
            ))),
        )
    }

    ///
    #[must_use]
    pub const fn spool(&self) -> Option<&Spool> {
        self.spool.as_ref()
    }

    /// The longest time a call to [`Dispatcher::send`] can take.
    #[must_use]
    pub fn budget(&self) -> std::time::Duration {
        self.policy.budget(self.attempt_timeout)
    }

    async fn attempt(&self, request: &SendRequest) -> Result<(), DeliveryError> {
        tokio::time::timeout(self.attempt_timeout, self.transport.send(request))
            .await
            .map_err(|_elapsed| DeliveryError::Timeout(self.attempt_timeout))?
    }

    /// Send the request, retrying the transient failures.
    ///
    /// When every attempt fails, the request is saved in the spool unless
    /// [`SendRequest::ignore_smtp_errors`] or [`SendRequest::no_spool`] is set.
    ///
    /// # Errors
    ///
    /// * the error of the last attempt
    #[tracing::instrument(
        name = "dispatch",
        skip_all,
        fields(from = %request.envelope_from, to = %request.envelope_to)
    )]
    pub async fn send(&self, request: SendRequest) -> Result<(), DeliveryError> {
        let attempts = self.policy.attempts();
        let mut retry = 0;

        let error = loop {
            match self.attempt(&request).await {
                Ok(()) => {
                    tracing::info!(retry, "Email delivered.");
                    return Ok(());
                }
                Err(error) if error.is_transient() && retry + 1 < attempts => {
                    retry += 1;
                    let delay = self.policy.delay(retry);
                    tracing::warn!(%error, retry, ?delay, "Retrying the delivery.");
                    tokio::time::sleep(delay).await;
                }
                Err(error) => break error,
            }
        };

        if request.ignore_smtp_errors {
            tracing::error!(%error, "Ignore smtp error.");
            return Err(error);
        }

        tracing::error!(%error, "Email delivery failure.");
        if request.no_spool {
            return Err(error);
        }
        if let Some(spool) = &self.spool {
            if let Err(spool_error) = spool.save(&request).await {
                tracing::error!(%spool_error, "The request is lost.");
            }
        }
        Err(error)
    }

    /// Try again every request of the spool.
    ///
    /// A request failing for the third time is moved to the `failed` directory.
    ///
    /// # Errors
    ///
    /// * the spool cannot be listed
    pub async fn resend_unsent(&self) -> Result<ResendReport, DeliveryError> {
        let mut report = ResendReport::default();
        let Some(spool) = &self.spool else {
            return Ok(report);
        };

        for path in spool.entries().await? {
            tracing::info!(path = %path.display(), "Trying to re-deliver.");

            let mut request = match Spool::load(&path).await {
                Ok(request) => request,
                Err(error) => {
                    tracing::error!(%error, path = %path.display(), "Cannot load the request.");
                    report.skipped += 1;
                    continue;
                }
            };
            request.retries += 1;
            request.ignore_smtp_errors = true;

            if self.send(request.clone()).await.is_ok() {
                tokio::fs::remove_file(&path).await?;
                report.delivered += 1;
            } else if request.retries > 2 {
                tokio::fs::remove_file(&path).await?;
                let failed = spool.save_failed(&request).await?;
                tracing::error!(
                    from = %request.envelope_from,
                    to = %request.envelope_to,
                    failed = %failed.display(),
                    "Giving up the delivery."
                );
                report.failed += 1;
            } else {
                Spool::write(&path, &request).await?;
                report.kept += 1;
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::{Dispatcher, ResendReport};
    use crate::{DeliveryError, Failure, Recorder, RetryPolicy, SendRequest, Spool};
    use std::{sync::Arc, time::Duration};

    fn dispatcher(recorder: &Arc<Recorder>, spool: Option<Spool>) -> Dispatcher {
        Dispatcher::new(
            recorder.clone(),
            RetryPolicy {
                max_attempts: 3,
                backoff: Duration::from_millis(1),
            },
            Duration::from_millis(200),
            spool,
        )
    }

    fn temp_spool() -> Spool {
        Spool::new(std::env::temp_dir().join(uuid::Uuid::new_v4().to_string()))
    }

    fn request() -> SendRequest {
        SendRequest::new("bounce@sl.example.com", "john@mailbox.com", "Subject: s\r\n\r\nb\r\n")
    }

    #[test_log::test(tokio::test)]
    async fn transient_errors_are_retried() {
        let recorder = Arc::new(Recorder::default());
        recorder.fail_next(Failure::Transient, 2).await;

        dispatcher(&recorder, None).send(request()).await.unwrap();

        assert_eq!(recorder.attempts(), 3);
        pretty_assertions::assert_eq!(recorder.sent().await, vec![request()]);
    }

    #[tokio::test]
    async fn permanent_error_is_not_retried() {
        let recorder = Arc::new(Recorder::default());
        recorder.fail_next(Failure::Permanent, 1).await;

        let spool = temp_spool();
        let error = dispatcher(&recorder, Some(spool.clone()))
            .send(request())
            .await
            .unwrap_err();

        assert!(matches!(error, DeliveryError::Permanent(_)));
        assert_eq!(recorder.attempts(), 1);
        assert_eq!(spool.entries().await.unwrap().len(), 1);

        tokio::fs::remove_dir_all(spool.dir()).await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_attempts_are_spooled() {
        let recorder = Arc::new(Recorder::default());
        recorder.fail_next(Failure::Transient, 3).await;

        let spool = temp_spool();
        let dispatcher = dispatcher(&recorder, Some(spool.clone()));
        assert!(dispatcher.send(request()).await.is_err());
        assert_eq!(recorder.attempts(), 3);

        let entries = spool.entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(Spool::load(&entries[0]).await.unwrap(), request());

        // ignored errors are not spooled
        recorder.fail_next(Failure::Transient, 3).await;
        assert!(dispatcher
            .send(request().ignore_smtp_errors())
            .await
            .is_err());
        assert_eq!(spool.entries().await.unwrap().len(), 1);

        recorder.fail_next(Failure::Transient, 3).await;
        assert!(dispatcher.send(request().no_spool()).await.is_err());
        assert_eq!(spool.entries().await.unwrap().len(), 1);

        tokio::fs::remove_dir_all(spool.dir()).await.unwrap();
    }

    #[tokio::test]
    async fn slow_transport_times_out() {
        let recorder = Arc::new(Recorder::with_latency(Duration::from_millis(500)));
        let dispatcher = Dispatcher::new(
            recorder.clone(),
            RetryPolicy {
                max_attempts: 2,
                backoff: Duration::from_millis(1),
            },
            Duration::from_millis(20),
            None,
        );

        let start = std::time::Instant::now();
        let error = dispatcher.send(request()).await.unwrap_err();

        assert!(matches!(error, DeliveryError::Timeout(_)));
        assert_eq!(recorder.attempts(), 2);
        assert!(start.elapsed() < Duration::from_millis(400));
        assert!(recorder.sent().await.is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn resend_unsent() {
        let recorder = Arc::new(Recorder::default());
        let spool = temp_spool();
        let dispatcher = dispatcher(&recorder, Some(spool.clone()));

        spool.save(&request()).await.unwrap();
        // every attempt of the first run fails
        recorder.fail_next(Failure::Transient, 3).await;
        assert_eq!(
            dispatcher.resend_unsent().await.unwrap(),
            ResendReport {
                kept: 1,
                ..ResendReport::default()
            }
        );
        let entries = spool.entries().await.unwrap();
        assert_eq!(Spool::load(&entries[0]).await.unwrap().retries, 1);

        assert_eq!(
            dispatcher.resend_unsent().await.unwrap(),
            ResendReport {
                delivered: 1,
                ..ResendReport::default()
            }
        );
        assert!(spool.entries().await.unwrap().is_empty());
        assert_eq!(recorder.sent().await.len(), 1);

        tokio::fs::remove_dir_all(spool.dir()).await.unwrap();
    }

    #[tokio::test]
    async fn resend_gives_up() {
        let recorder = Arc::new(Recorder::default());
        let spool = temp_spool();
        let dispatcher = dispatcher(&recorder, Some(spool.clone()));

        let mut spooled = request();
        spooled.retries = 2;
        spool.save(&spooled).await.unwrap();
        tokio::fs::write(spool.dir().join("broken.sendrequest"), b"{")
            .await
            .unwrap();

        recorder.fail_next(Failure::Permanent, 1).await;
        assert_eq!(
            dispatcher.resend_unsent().await.unwrap(),
            ResendReport {
                failed: 1,
                skipped: 1,
                ..ResendReport::default()
            }
        );
        assert_eq!(spool.entries().await.unwrap().len(), 1);
        let failed = spool.failed_entries().await.unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(Spool::load(&failed[0]).await.unwrap().retries, 3);

        tokio::fs::remove_dir_all(spool.dir()).await.unwrap();
    }
}
