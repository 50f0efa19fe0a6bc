//! Rate-limited, retrying JSON fetcher.
//!
//! Every attempt (retries included) waits until at least `60 / rpm` seconds
//! have passed since the previous attempt of the same fetcher. Failed
//! attempts back off exponentially. When all attempts fail the fetcher
//! returns `None`; transport errors never reach the caller.

use crate::config::FetchConfig;
use crate::error::FetchError;
use serde_json::Value;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Something that can perform one GET request and decode a JSON body.
///
/// The HTTP implementation is [`HttpTransport`]; tests substitute in-memory
/// transports.
pub trait Transport: Send + Sync {
    fn get_json(&self, url: &str, timeout: Duration) -> Result<Value, FetchError>;
}

/// Blocking reqwest transport.
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Result<Self, FetchError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(user_agent)
            .build()
            .map_err(|e| FetchError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get_json(&self, url: &str, timeout: Duration) -> Result<Value, FetchError> {
        let resp = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .timeout(timeout)
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(e.to_string())
                } else if e.is_connect() {
                    FetchError::NetworkUnreachable(e.to_string())
                } else {
                    FetchError::Other(e.to_string())
                }
            })?;

        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                url: redact(url),
            });
        }

        resp.json::<Value>()
            .map_err(|e| FetchError::Decode(e.to_string()))
    }
}

#[derive(Debug, Default)]
struct ThrottleState {
    last_request: Option<Instant>,
    request_count: u64,
}

/// Wraps a [`Transport`] with throttling and retry.
pub struct Fetcher {
    transport: Box<dyn Transport>,
    config: FetchConfig,
    state: Mutex<ThrottleState>,
}

impl Fetcher {
    pub fn new(transport: Box<dyn Transport>, config: FetchConfig) -> Self {
        Self {
            transport,
            config,
            state: Mutex::new(ThrottleState::default()),
        }
    }

    /// Fetcher over a real HTTP client built from `config`.
    pub fn http(config: FetchConfig) -> Result<Self, FetchError> {
        let transport = HttpTransport::new(&config.user_agent)?;
        Ok(Self::new(Box::new(transport), config))
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Number of outbound attempts made so far.
    pub fn request_count(&self) -> u64 {
        self.lock_state().request_count
    }

    /// GET `url` and decode the body, retrying transient failures.
    ///
    /// Returns `None` once every attempt has failed.
    pub fn fetch(&self, url: &str) -> Option<Value> {
        let attempts = self.config.max_retries.max(1);

        for attempt in 0..attempts {
            self.throttle();
            debug!(url = %redact(url), attempt, "outbound request");

            match self.transport.get_json(url, self.config.timeout()) {
                Ok(value) => return Some(value),
                Err(e) if attempt + 1 == attempts => {
                    warn!(
                        url = %redact(url),
                        attempts,
                        error = %e,
                        "request failed after all attempts"
                    );
                }
                Err(e) => {
                    let delay = self.config.backoff_delay(attempt);
                    warn!(
                        url = %redact(url),
                        attempt = attempt + 1,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "request failed, retrying"
                    );
                    std::thread::sleep(delay);
                }
            }
        }

        None
    }

    /// Block until the minimum spacing since the previous attempt has elapsed,
    /// then record this attempt.
    fn throttle(&self) {
        let min_interval = self.config.min_interval();
        let mut state = self.lock_state();
        if let Some(last) = state.last_request {
            let elapsed = last.elapsed();
            if elapsed < min_interval {
                std::thread::sleep(min_interval - elapsed);
            }
        }
        state.last_request = Some(Instant::now());
        state.request_count += 1;
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, ThrottleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Strip credentials from a URL before it is logged.
pub fn redact(url: &str) -> String {
    let Some((base, query)) = url.split_once('?') else {
        return url.to_string();
    };
    let params: Vec<String> = query
        .split('&')
        .map(|pair| match pair.split_once('=') {
            Some((k, _)) if k.eq_ignore_ascii_case("api_key") => format!("{k}=***"),
            _ => pair.to_string(),
        })
        .collect();
    format!("{base}?{}", params.join("&"))
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory transports shared by the unit tests of this crate.

    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Serves canned responses keyed by URL prefix; unknown URLs fail.
    #[derive(Clone, Default)]
    pub struct StubTransport {
        routes: Arc<Mutex<HashMap<String, Value>>>,
        calls: Arc<AtomicUsize>,
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl StubTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(self, prefix: &str, body: Value) -> Self {
            self.routes.lock().unwrap().insert(prefix.to_string(), body);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    impl Transport for StubTransport {
        fn get_json(&self, url: &str, _timeout: Duration) -> Result<Value, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(url.to_string());
            let routes = self.routes.lock().unwrap();
            routes
                .iter()
                .find(|(prefix, _)| url.starts_with(prefix.as_str()))
                .map(|(_, body)| body.clone())
                .ok_or_else(|| FetchError::NetworkUnreachable(format!("no route for {url}")))
        }
    }

    /// Settings that keep retry tests fast.
    pub fn fast_config() -> FetchConfig {
        FetchConfig {
            requests_per_minute: 600_000,
            max_retries: 3,
            backoff_base: 2.0,
            backoff_unit_ms: 1,
            timeout_secs: 1,
            ..FetchConfig::default()
        }
    }
}
