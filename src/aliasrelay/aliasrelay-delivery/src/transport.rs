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
use crate::{DeliveryError, SendRequest};

/// Something able to hand a [`SendRequest`] over, in one attempt.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Make one delivery attempt.
    ///
    /// # Errors
    ///
    /// * see [`DeliveryError`]
    async fn send(&self, request: &SendRequest) -> Result<(), DeliveryError>;
}

/// Kind of the failures a [`Recorder`] is asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// produce a [`DeliveryError::Transient`]
    Transient,
    /// produce a [`DeliveryError::Permanent`]
    Permanent,
}

/// A [`Transport`] keeping the requests in memory instead of sending them.
///
/// It can be asked to fail the next attempts, and to take some time for each one.
#[derive(Debug, Default)]
pub struct Recorder {
    sent: tokio::sync::Mutex<Vec<SendRequest>>,
    failures: tokio::sync::Mutex<std::collections::VecDeque<Failure>>,
    attempts: std::sync::atomic::AtomicUsize,
    latency: Option<std::time::Duration>,
}

impl Recorder {
    /// Every attempt sleeps `latency` before succeeding or failing.
    #[must_use]
    pub fn with_latency(latency: std::time::Duration) -> Self {
        Self {
            latency: Some(latency),
            ..Self::default()
        }
    }

    /// The next `times` attempts fail with `failure`.
    pub async fn fail_next(&self, failure: Failure, times: usize) {
        self.failures
            .lock()
            .await
            .extend(std::iter::repeat(failure).take(times));
    }

    /// The requests successfully sent, in order.
    pub async fn sent(&self) -> Vec<SendRequest> {
        self.sent.lock().await.clone()
    }

    /// Forget the requests sent so far.
    pub async fn purge(&self) {
        self.sent.lock().await.clear();
    }

    /// Number of attempts, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for Recorder {
    async fn send(&self, request: &SendRequest) -> Result<(), DeliveryError> {
        self.attempts
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        match self.failures.lock().await.pop_front() {
            Some(Failure::Transient) => Err(DeliveryError::Transient(
                "421 4.3.0 Service not available".to_string(),
            )),
            Some(Failure::Permanent) => Err(DeliveryError::Permanent(
                "550 5.1.1 User unknown".to_string(),
            )),
            None => {
                tracing::debug!(
                    from = %request.envelope_from,
                    to = %request.envelope_to,
                    "Request recorded."
                );
                self.sent.lock().await.push(request.clone());
                Ok(())
            }
        }
    }
}
