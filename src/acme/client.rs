//! The request executor: sign → send → harvest nonce → retry on stale nonce.

use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::directory::Directory;
use super::error::AcmeError;
use super::jws::JwsSigner;
use super::nonce::NoncePool;
use super::problem::Problem;
use crate::cancel::CancelToken;

const JOSE_JSON: &str = "application/jose+json";
const REPLAY_NONCE: &str = "Replay-Nonce";

/// Backoff schedule and the retryable/permanent predicate for the signed
/// request loop. Only a bad-nonce rejection is retryable: nonce staleness is
/// a protocol-level race, and re-signing the same idempotent body with a
/// fresh nonce cannot change its effect. Everything else is permanent.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
    pub max_elapsed: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_millis(200),
            max_interval: Duration::from_secs(5),
            max_elapsed: Duration::from_secs(20),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn is_retryable(&self, problem: &Problem) -> bool {
        problem.is_bad_nonce()
    }

    /// Interval to wait before the given retry attempt (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt.saturating_sub(1).min(16) as i32);
        let millis = self.initial_interval.as_millis() as f64 * factor;
        Duration::from_millis(millis as u64).min(self.max_interval)
    }
}

/// A response from the CA with the headers ACME consumes already extracted.
#[derive(Debug, Clone)]
pub struct AcmeResponse {
    pub status: u16,
    pub location: Option<String>,
    pub links: Vec<String>,
    pub retry_after: Option<String>,
    pub body: String,
}

impl AcmeResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AcmeError> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// ACME client: HTTP agent, immutable directory, nonce pool and signer.
///
/// Safe for concurrent use; the directory is shared read-only, the nonce
/// pool and the signer's key identifier are the only mutable shared state.
pub struct AcmeClient {
    agent: ureq::Agent,
    directory: Directory,
    nonces: NoncePool,
    signer: JwsSigner,
    retry: RetryPolicy,
}

impl AcmeClient {
    /// Fetches the directory from `directory_url` and builds a client around
    /// it.
    pub fn connect(directory_url: &str, signer: JwsSigner) -> Result<Self, AcmeError> {
        Self::connect_with(directory_url, signer, RetryPolicy::default())
    }

    pub fn connect_with(
        directory_url: &str,
        signer: JwsSigner,
        retry: RetryPolicy,
    ) -> Result<Self, AcmeError> {
        let agent = build_agent();
        let directory = Directory::fetch(&agent, directory_url)?;
        debug!("[acme] directory bootstrapped from {directory_url}");
        Ok(Self {
            agent,
            directory,
            nonces: NoncePool::new(),
            signer,
            retry,
        })
    }

    pub fn directory(&self) -> &Directory {
        &self.directory
    }

    pub fn signer(&self) -> &JwsSigner {
        &self.signer
    }

    pub fn nonce_pool(&self) -> &NoncePool {
        &self.nonces
    }

    pub(crate) fn agent(&self) -> &ureq::Agent {
        &self.agent
    }

    /// Signed POST with a JSON payload.
    pub fn post<T: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: &T,
        cancel: &CancelToken,
    ) -> Result<AcmeResponse, AcmeError> {
        self.execute(url, Some(payload), cancel)
    }

    /// POST-as-GET (RFC 8555 §6.3): a signed POST with an empty payload,
    /// used for all read operations.
    pub fn post_as_get(&self, url: &str, cancel: &CancelToken) -> Result<AcmeResponse, AcmeError> {
        self.execute(url, None::<&()>, cancel)
    }

    fn execute<T: Serialize + ?Sized>(
        &self,
        url: &str,
        payload: Option<&T>,
        cancel: &CancelToken,
    ) -> Result<AcmeResponse, AcmeError> {
        let started = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            cancel.check()?;
            let nonce = self.take_nonce()?;
            let jose = self.signer.sign(url, &nonce, payload)?;
            let body = serde_json::to_string(&jose)?;

            match self.agent.post(url).set("Content-Type", JOSE_JSON).send_string(&body) {
                Ok(response) => return self.finish(response),
                Err(ureq::Error::Status(status, response)) => {
                    self.harvest_nonce(&response);
                    let text = response.into_string().unwrap_or_default();
                    let problem = Problem::from_response(status, &text);
                    if !self.retry.is_retryable(&problem) {
                        return Err(AcmeError::Problem(problem));
                    }

                    attempt += 1;
                    let wait = self.retry.backoff(attempt);
                    if started.elapsed() + wait >= self.retry.max_elapsed {
                        warn!(
                            "[acme] bad-nonce retries exhausted for {url} after {:?} ({} attempts)",
                            started.elapsed(),
                            attempt
                        );
                        return Err(AcmeError::RetryBudgetExhausted {
                            attempts: attempt,
                            elapsed: started.elapsed(),
                            last: problem,
                        });
                    }
                    debug!(
                        "[acme] stale nonce for {url}, re-signing in {}ms (attempt {attempt})",
                        wait.as_millis()
                    );
                    sleep_within(wait, cancel);
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    fn finish(&self, response: ureq::Response) -> Result<AcmeResponse, AcmeError> {
        self.harvest_nonce(&response);
        let status = response.status();
        let location = response.header("Location").map(str::to_string);
        let links = response.all("Link").iter().map(|link| link.to_string()).collect();
        let retry_after = response.header("Retry-After").map(str::to_string);
        let body = response.into_string()?;
        Ok(AcmeResponse {
            status,
            location,
            links,
            retry_after,
            body,
        })
    }

    fn take_nonce(&self) -> Result<String, AcmeError> {
        if let Some(nonce) = self.nonces.pop() {
            return Ok(nonce);
        }
        self.fetch_nonce()
    }

    /// Fetches a fresh nonce from the CA's nonce endpoint. Called only when
    /// the pool is empty, and never while holding the pool's lock.
    pub fn fetch_nonce(&self) -> Result<String, AcmeError> {
        debug!("[acme] nonce pool empty, fetching from {}", self.directory.new_nonce);
        let response = match self.agent.head(&self.directory.new_nonce).call() {
            Ok(response) => response,
            // Some CAs answer HEAD new-nonce with 204 or even an error
            // status; the header is what matters.
            Err(ureq::Error::Status(_, response)) => response,
            Err(err) => return Err(err.into()),
        };
        response
            .header(REPLAY_NONCE)
            .map(str::to_string)
            .ok_or(AcmeError::MissingHeader(REPLAY_NONCE))
    }

    fn harvest_nonce(&self, response: &ureq::Response) {
        if let Some(nonce) = response.header(REPLAY_NONCE) {
            self.nonces.push(nonce.to_string());
        }
    }
}

impl std::fmt::Debug for AcmeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeClient")
            .field("directory", &self.directory.new_order)
            .field("pooled_nonces", &self.nonces.len())
            .finish()
    }
}

fn sleep_within(wait: Duration, cancel: &CancelToken) {
    let wait = match cancel.remaining() {
        Some(remaining) => wait.min(remaining),
        None => wait,
    };
    if !wait.is_zero() {
        std::thread::sleep(wait);
    }
}

fn build_agent() -> ureq::Agent {
    ureq::AgentBuilder::new().timeout(resolve_timeout()).build()
}

fn resolve_timeout() -> Duration {
    const DEFAULT_TIMEOUT_SECS: u64 = 30;
    let timeout = std::env::var("CERTFORGE_HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|raw| raw.parse::<u64>().ok())
        .unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout == 0 {
        warn!("[acme] invalid http timeout value; using default");
        return Duration::from_secs(DEFAULT_TIMEOUT_SECS);
    }
    Duration::from_secs(timeout)
}
