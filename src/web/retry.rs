//! Stateful retry rules for transient HTTP failures.
//!
//! A [`RetryPolicy`] is built fresh for every logical request. Each attempt is offered to the
//! rules in priority order; the first rule that matches and still has schedule left consumes one
//! slot and yields its delay. A drained schedule simply stops matching, which ends the request.

use super::transport::{HttpResponse, TransportError};
use core::time::Duration;
use reqwest::header::{HeaderMap, RETRY_AFTER};

/// GitHub's body message for the secondary (abuse) rate limit
pub const ABUSE_DETECTION_MESSAGE: &str =
    "You have triggered an abuse detection mechanism. Please wait a few minutes before you try again.";

const LINEAR_FAST_ATTEMPTS: usize = 50;
const TRANSPORT_ATTEMPTS: usize = 5;

/// The outcome of one HTTP attempt as seen by the retry rules
#[derive(Debug, Clone, Copy)]
pub enum Attempt<'a> {
    Response(&'a HttpResponse),
    Failure(&'a TransportError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryCondition {
    /// Response with exactly this status code
    Status(u16),

    /// Response with this status whose `$.message` equals the given text
    StatusWithMessage(u16, &'static str),

    /// Timeouts, connection failures and interrupted bodies
    FlakyTransport,
}

impl RetryCondition {
    #[must_use]
    pub fn matches(&self, attempt: &Attempt<'_>) -> bool {
        match (self, attempt) {
            (Self::Status(status), Attempt::Response(response)) => response.status() == *status,
            (Self::StatusWithMessage(status, message), Attempt::Response(response)) => {
                response.status() == *status && response.message().as_deref() == Some(*message)
            }
            (Self::FlakyTransport, Attempt::Failure(error)) => error.is_flaky(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryRule {
    name: &'static str,
    condition: RetryCondition,
    schedule: Vec<Duration>,
    attempts_used: usize,
}

impl RetryRule {
    #[must_use]
    pub const fn new(name: &'static str, condition: RetryCondition, schedule: Vec<Duration>) -> Self {
        Self {
            name,
            condition,
            schedule,
            attempts_used: 0,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn attempts_used(&self) -> usize {
        self.attempts_used
    }

    /// Consume one scheduled retry if this rule applies to the attempt
    pub fn try_consume(&mut self, attempt: &Attempt<'_>) -> Option<Duration> {
        if !self.condition.matches(attempt) {
            return None;
        }

        let delay = *self.schedule.get(self.attempts_used)?;
        self.attempts_used += 1;
        Some(delay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryDecision {
    pub rule: &'static str,
    pub delay: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    rules: Vec<RetryRule>,
}

impl RetryPolicy {
    #[must_use]
    pub const fn new(rules: Vec<RetryRule>) -> Self {
        Self { rules }
    }

    /// A policy that never retries
    #[must_use]
    pub const fn none() -> Self {
        Self { rules: Vec::new() }
    }

    /// The standard ordered rule set used for every GitHub request
    #[must_use]
    pub fn canonical() -> Self {
        Self::new(vec![
            RetryRule::new("GatewayTimeout", RetryCondition::Status(504), exponential_fast()),
            RetryRule::new("BadGateway", RetryCondition::Status(502), linear_fast()),
            RetryRule::new("InternalServerError", RetryCondition::Status(500), exponential_fast()),
            RetryRule::new(
                "AbuseDetection",
                RetryCondition::StatusWithMessage(403, ABUSE_DETECTION_MESSAGE),
                exponential_slow(),
            ),
            RetryRule::new("FlakyTransport", RetryCondition::FlakyTransport, transport_linear()),
        ])
    }

    /// Append a rule with the lowest priority
    #[must_use]
    pub fn with_rule(mut self, rule: RetryRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Retry a 404 once, immediately
    #[must_use]
    pub fn with_not_found_once(self) -> Self {
        self.with_rule(RetryRule::new("NotFoundOnce", RetryCondition::Status(404), immediate_once()))
    }

    pub fn next_delay(&mut self, attempt: &Attempt<'_>) -> Option<RetryDecision> {
        self.rules.iter_mut().find_map(|rule| {
            rule.try_consume(attempt).map(|delay| RetryDecision { rule: rule.name, delay })
        })
    }
}

#[must_use]
pub fn linear_fast() -> Vec<Duration> {
    vec![Duration::ZERO; LINEAR_FAST_ATTEMPTS]
}

#[must_use]
pub fn exponential_fast() -> Vec<Duration> {
    vec![
        Duration::from_secs(1),
        Duration::from_secs(3),
        Duration::from_secs(10),
        Duration::from_secs(60),
        Duration::from_secs(300),
    ]
}

#[must_use]
pub fn exponential_slow() -> Vec<Duration> {
    vec![
        Duration::from_secs(5),
        Duration::from_secs(10),
        Duration::from_secs(30),
        Duration::from_secs(120),
        Duration::from_secs(300),
    ]
}

#[must_use]
pub fn immediate_once() -> Vec<Duration> {
    vec![Duration::ZERO]
}

#[must_use]
pub fn transport_linear() -> Vec<Duration> {
    vec![Duration::from_secs(1); TRANSPORT_ATTEMPTS]
}

/// Parse the `Retry-After` header as integral seconds.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let s = headers.get(RETRY_AFTER).and_then(|h| h.to_str().ok())?;
    s.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::web::transport::TransportErrorKind;

    fn response(status: u16) -> HttpResponse {
        HttpResponse::from_body(status, "{}")
    }

    #[test]
    fn test_rule_retries_exactly_schedule_length() {
        let mut rule = RetryRule::new(
            "Test",
            RetryCondition::Status(503),
            vec![Duration::from_millis(1), Duration::from_millis(2), Duration::from_millis(3)],
        );
        let failure = response(503);
        let attempt = Attempt::Response(&failure);

        assert_eq!(rule.try_consume(&attempt), Some(Duration::from_millis(1)));
        assert_eq!(rule.try_consume(&attempt), Some(Duration::from_millis(2)));
        assert_eq!(rule.try_consume(&attempt), Some(Duration::from_millis(3)));
        assert_eq!(rule.try_consume(&attempt), None);
        assert_eq!(rule.attempts_used(), 3);
    }

    #[test]
    fn test_non_matching_attempt_does_not_consume() {
        let mut rule = RetryRule::new("Test", RetryCondition::Status(502), immediate_once());
        let ok = response(200);
        assert_eq!(rule.try_consume(&Attempt::Response(&ok)), None);
        assert_eq!(rule.attempts_used(), 0);
    }

    #[test]
    fn test_canonical_order_and_schedules() {
        let mut policy = RetryPolicy::canonical();

        let gateway = response(504);
        let decision = policy.next_delay(&Attempt::Response(&gateway)).unwrap();
        assert_eq!(decision.rule, "GatewayTimeout");
        assert_eq!(decision.delay, Duration::from_secs(1));

        let bad_gateway = response(502);
        let decision = policy.next_delay(&Attempt::Response(&bad_gateway)).unwrap();
        assert_eq!(decision.rule, "BadGateway");
        assert_eq!(decision.delay, Duration::ZERO);

        let server_error = response(500);
        assert_eq!(policy.next_delay(&Attempt::Response(&server_error)).unwrap().rule, "InternalServerError");
    }

    #[test]
    fn test_bad_gateway_budget_is_fifty() {
        let mut policy = RetryPolicy::canonical();
        let bad_gateway = response(502);
        let attempt = Attempt::Response(&bad_gateway);

        for _ in 0..LINEAR_FAST_ATTEMPTS {
            assert!(policy.next_delay(&attempt).is_some());
        }
        assert_eq!(policy.next_delay(&attempt), None);
    }

    #[test]
    fn test_abuse_detection_matched_by_body() {
        let mut policy = RetryPolicy::canonical();

        let abuse = HttpResponse::from_body(403, format!(r#"{{"message": "{ABUSE_DETECTION_MESSAGE}"}}"#));
        let decision = policy.next_delay(&Attempt::Response(&abuse)).unwrap();
        assert_eq!(decision.rule, "AbuseDetection");
        assert_eq!(decision.delay, Duration::from_secs(5));

        let forbidden = HttpResponse::from_body(403, r#"{"message": "Resource not accessible by integration"}"#);
        assert_eq!(policy.next_delay(&Attempt::Response(&forbidden)), None);
    }

    #[test]
    fn test_flaky_transport_errors() {
        let mut policy = RetryPolicy::canonical();

        let timeout = TransportError::new(TransportErrorKind::Timeout, "timed out");
        let decision = policy.next_delay(&Attempt::Failure(&timeout)).unwrap();
        assert_eq!(decision.rule, "FlakyTransport");
        assert_eq!(decision.delay, Duration::from_secs(1));

        let other = TransportError::new(TransportErrorKind::Other, "invalid url");
        assert_eq!(policy.next_delay(&Attempt::Failure(&other)), None);
    }

    #[test]
    fn test_not_found_once() {
        let not_found = response(404);
        let attempt = Attempt::Response(&not_found);

        assert_eq!(RetryPolicy::canonical().next_delay(&attempt), None);

        let mut policy = RetryPolicy::canonical().with_not_found_once();
        assert_eq!(policy.next_delay(&attempt).unwrap().delay, Duration::ZERO);
        assert_eq!(policy.next_delay(&attempt), None);
    }

    #[test]
    fn test_parse_retry_after() {
        let with_header = HttpResponse::from_body(429, "").with_header("Retry-After", "30");
        assert_eq!(parse_retry_after(with_header.headers()), Some(Duration::from_secs(30)));

        let bad = HttpResponse::from_body(429, "").with_header("Retry-After", "soon");
        assert_eq!(parse_retry_after(bad.headers()), None);

        assert_eq!(parse_retry_after(&HeaderMap::new()), None);
    }
}
