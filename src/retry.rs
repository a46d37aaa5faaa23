// Copyright 2024 Bridge Relayer Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Retry logic for reconnection attempts.

use std::time::Duration;

use backoff::backoff::Backoff;

/// Exponential backoff with a maximum retry count: the n-th retry
/// (1-indexed) is delayed by `base * 2^(n-1)`, and once `max_retry_count`
/// retries have been handed out it returns `None` to indicate that we
/// should stop retrying.
#[derive(Debug)]
pub struct ExponentialWithMaxRetryCount {
    base: Duration,
    max_retry_count: usize,
    count: usize,
}

impl ExponentialWithMaxRetryCount {
    /// Creates a new exponential backoff with `base` delay and `max_retry_count`.
    pub fn new(base: Duration, max_retry_count: usize) -> Self {
        Self {
            base,
            max_retry_count,
            count: 0,
        }
    }

    /// How many retries have been handed out since the last reset.
    pub fn attempts(&self) -> usize {
        self.count
    }
}

impl Backoff for ExponentialWithMaxRetryCount {
    fn next_backoff(&mut self) -> Option<Duration> {
        (self.count < self.max_retry_count).then(|| {
            let delay = self.base * 2u32.pow(self.count as u32);
            self.count += 1;
            delay
        })
    }

    fn reset(&mut self) {
        self.count = 0;
    }
}
