//! Caller-supplied context threaded through every query.

use std::time::{Duration, Instant};

use uuid::Uuid;

/// Optional point in time after which backend calls and decoder runs give up.
#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never expires.
    pub fn none() -> Self {
        Self { at: None }
    }

    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Some(Instant::now() + timeout),
        }
    }

    /// Builds a deadline from a configured number of seconds, `0` meaning none.
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            Self::none()
        } else {
            Self::after(Duration::from_secs(secs))
        }
    }

    /// Time left before expiry; `None` when unbounded, zero once expired.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(left) if left.is_zero())
    }
}

/// Who is asking, and which addresses must never appear in their results.
#[derive(Debug, Clone)]
pub struct CallerContext {
    /// Prefix of every log line written on behalf of this request.
    pub request_id: Uuid,
    /// Tenant group of the caller, compared against the isolation group.
    pub user_group: String,
    /// Source/destination IPs excluded from every correlation lookup.
    pub excluded_ips: Vec<String>,
    pub deadline: Deadline,
}

impl Default for CallerContext {
    fn default() -> Self {
        Self {
            request_id: Uuid::new_v4(),
            user_group: String::new(),
            excluded_ips: Vec::new(),
            deadline: Deadline::none(),
        }
    }
}

impl CallerContext {
    pub fn new<S: Into<String>>(user_group: S) -> Self {
        Self {
            user_group: user_group.into(),
            ..Default::default()
        }
    }

    pub fn with_excluded_ips(mut self, ips: Vec<String>) -> Self {
        self.excluded_ips = ips;
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }
}
