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
/// How many times a transient failure is retried, and how long to wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts including the first one, at least one attempt is made.
    pub max_attempts: usize,
    /// The delay before the retry `k` is `backoff * k`.
    pub backoff: std::time::Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: std::time::Duration::from_millis(300),
        }
    }
}

impl RetryPolicy {
    /// Delay before the retry number `retry` (starting at 1).
    #[must_use]
    pub fn delay(&self, retry: usize) -> std::time::Duration {
        self.backoff
            .saturating_mul(u32::try_from(retry).unwrap_or(u32::MAX))
    }

    ///
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Upper bound of a dispatch whose attempts last at most `attempt_timeout`.
    #[must_use]
    pub fn budget(&self, attempt_timeout: std::time::Duration) -> std::time::Duration {
        (1..self.attempts()).fold(
            attempt_timeout.saturating_mul(u32::try_from(self.attempts()).unwrap_or(u32::MAX)),
            |total, retry| total.saturating_add(self.delay(retry)),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::RetryPolicy;
    use std::time::Duration;

    #[rstest::rstest]
    #[case(1, Duration::from_millis(300))]
    #[case(2, Duration::from_millis(600))]
    #[case(5, Duration::from_millis(1500))]
    fn delay(#[case] retry: usize, #[case] expected: Duration) {
        assert_eq!(RetryPolicy::default().delay(retry), expected);
    }

    #[test]
    fn budget() {
        let policy = RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        };
        // 3 attempts of 10s, then 1s and 2s of backoff
        assert_eq!(policy.budget(Duration::from_secs(10)), Duration::from_secs(33));

        let policy = RetryPolicy {
            max_attempts: 0,
            backoff: Duration::from_secs(1),
        };
        assert_eq!(policy.attempts(), 1);
        assert_eq!(policy.budget(Duration::from_secs(10)), Duration::from_secs(10));
    }
}
