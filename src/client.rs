//! Blocking HTTP client for the weather/air-quality `current.json` endpoint.
//!
//! - Uses `ureq` (no async) with a global per-request timeout.
//! - One GET per sensor location: `key`, `q=<lat>,<lon>`, `aqi=yes`.
//! - Optional bounded retry with exponential backoff for transient failures
//!   (transport errors, timeouts, 5xx). Defaults to a single attempt.

use crate::geo::Coord;
use crate::models::weather::CurrentResponse;
use log::debug;
use rand::Rng;
use std::num::NonZeroU32;
use std::thread;
use std::time::Duration;

const BACKOFF_BASE: Duration = Duration::from_millis(500);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
const BACKOFF_JITTER_MS: u64 = 250;

#[derive(Debug)]
pub enum WeatherApiError {
    Timeout,
    Transport(String),
    Http { status: u16, message: String },
    Json(String),
}

impl WeatherApiError {
    fn is_transient(&self) -> bool {
        match self {
            WeatherApiError::Timeout | WeatherApiError::Transport(_) => true,
            WeatherApiError::Http { status, .. } => *status >= 500 || *status == 429,
            WeatherApiError::Json(_) => false,
        }
    }
}

impl core::fmt::Display for WeatherApiError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            WeatherApiError::Timeout => write!(f, "request timed out"),
            WeatherApiError::Transport(s) => write!(f, "transport error: {}", s),
            WeatherApiError::Http { status, message } => write!(f, "http {}: {}", status, message),
            WeatherApiError::Json(e) => write!(f, "malformed payload: {}", e),
        }
    }
}

impl std::error::Error for WeatherApiError {}

impl From<ureq::Error> for WeatherApiError {
    fn from(value: ureq::Error) -> Self {
        match value {
            ureq::Error::Timeout(_) => WeatherApiError::Timeout,
            ureq::Error::StatusCode(status) => WeatherApiError::Http {
                status,
                message: String::from("<no body>"),
            },
            other => WeatherApiError::Transport(other.to_string()),
        }
    }
}

pub struct WeatherApiClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
    max_attempts: NonZeroU32,
}

impl WeatherApiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        timeout: Duration,
        max_attempts: NonZeroU32,
    ) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();

        WeatherApiClient {
            agent: config.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            max_attempts,
        }
    }

    /// Current conditions at `at`, retried per the configured attempt budget.
    pub fn get_current(&self, at: Coord) -> Result<CurrentResponse, WeatherApiError> {
        let mut attempt = 1;
        loop {
            match self.get_current_once(at) {
                Ok(resp) => return Ok(resp),
                Err(e) if e.is_transient() && attempt < self.max_attempts.get() => {
                    let delay = backoff_delay(attempt);
                    debug!(
                        "current({},{}) attempt {} failed ({}); retrying in {}ms",
                        at.lat,
                        at.lon,
                        attempt,
                        e,
                        delay.as_millis()
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn get_current_once(&self, at: Coord) -> Result<CurrentResponse, WeatherApiError> {
        let q = format!("{},{}", at.lat, at.lon);
        let mut resp = self
            .agent
            .get(&self.base_url)
            .header("Accept", "application/json")
            .query("key", &self.api_key)
            .query("q", &q)
            .query("aqi", "yes")
            .call()?;

        let status = resp.status();
        let body = resp.body_mut().read_to_string()?;
        check_status(status, &body)?;
        parse_current(&body)
    }
}

fn check_status(status: http::StatusCode, body: &str) -> Result<(), WeatherApiError> {
    if status.is_success() {
        return Ok(());
    }
    let message = if body.trim().is_empty() {
        String::from("<no body>")
    } else {
        body.trim().to_string()
    };
    Err(WeatherApiError::Http {
        status: status.as_u16(),
        message,
    })
}

/// Deserialize a `current.json` body, reporting the JSON path of the first mismatch.
pub fn parse_current(body: &str) -> Result<CurrentResponse, WeatherApiError> {
    let de = &mut serde_json::Deserializer::from_str(body);
    serde_path_to_error::deserialize(de).map_err(|e| WeatherApiError::Json(format!("{} at {}", e.inner(), e.path())))
}

/// Exponential backoff for retry number `attempt` (1-based), capped, plus jitter.
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE.saturating_mul(1u32 << (attempt - 1).min(16));
    let jitter = Duration::from_millis(rand::rng().random_range(0..=BACKOFF_JITTER_MS));
    exp.min(BACKOFF_CAP) + jitter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_reports_json_path() {
        let body = r#"{"location":{"lat":"north","lon":2.0},"current":{"air_quality":{}}}"#;
        match parse_current(body) {
            Err(WeatherApiError::Json(msg)) => assert!(msg.contains("location.lat"), "{msg}"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn parse_rejects_non_json() {
        assert!(matches!(parse_current("<html>502</html>"), Err(WeatherApiError::Json(_))));
    }

    #[test]
    fn non_success_status_is_http_error() {
        let err = check_status(http::StatusCode::FORBIDDEN, r#"{"error":{"code":2008}}"#).unwrap_err();
        match err {
            WeatherApiError::Http { status, ref message } => {
                assert_eq!(status, 403);
                assert!(message.contains("2008"));
            }
            ref other => panic!("unexpected {:?}", other),
        }
        assert!(!err.is_transient());
        assert!(check_status(http::StatusCode::OK, "").is_ok());
    }

    #[test]
    fn transient_classification() {
        assert!(WeatherApiError::Timeout.is_transient());
        assert!(
            WeatherApiError::Http {
                status: 503,
                message: String::new()
            }
            .is_transient()
        );
        assert!(!WeatherApiError::Json(String::new()).is_transient());
    }

    #[test]
    fn backoff_grows_and_is_capped() {
        let first = backoff_delay(1);
        assert!(first >= BACKOFF_BASE && first <= BACKOFF_BASE + Duration::from_millis(BACKOFF_JITTER_MS));
        let third = backoff_delay(3);
        assert!(third >= BACKOFF_BASE * 4);
        let huge = backoff_delay(40);
        assert!(huge <= BACKOFF_CAP + Duration::from_millis(BACKOFF_JITTER_MS));
    }
}
