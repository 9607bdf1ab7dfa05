//! The DNS-01 solver, in three externally driven phases: present the record
//! (`pre_solve`), wait for propagation and have the CA validate (`solve`),
//! remove the record (`clean_up`). [`Dns01Solver::solve_order`] drives all
//! three across an order, presenting every record before any wait begins.

use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use log::{debug, info, warn};

use super::{DnsProvider, KeyAuthorization};
use crate::acme::authorization::{
    Authorization, AuthorizationStatus, Challenge, ChallengeStatus, DNS01,
};
use crate::acme::client::AcmeClient;
use crate::cancel::CancelToken;
use crate::dns::{Dns01Config, PropagationChecker, sleep_within};
use crate::fqdn::challenge_record_name;

/// Upper bound on waiting for the CA to finish validating an accepted
/// challenge.
const CHALLENGE_POLL_TIMEOUT: Duration = Duration::from_secs(300);

/// A caller-supplied readiness probe, given the record owner name and the
/// expected TXT value. Returns `Ok(true)` once the record is considered
/// placed. When installed it replaces the built-in propagation check.
pub type PreCheckFn = Box<dyn Fn(&str, &str) -> Result<bool> + Send + Sync>;

pub struct Dns01Solver<P> {
    provider: P,
    checker: PropagationChecker,
    pre_check: Option<PreCheckFn>,
}

/// Everything one challenge needs, recomputed deterministically so each
/// phase can be invoked on its own.
struct ChallengeRecord<'a> {
    challenge: &'a Challenge,
    keyauth: KeyAuthorization,
    value: String,
    record_fqdn: String,
}

impl<P: DnsProvider> Dns01Solver<P> {
    pub fn new(provider: P) -> Self {
        Self::with_config(provider, Dns01Config::default())
    }

    pub fn with_config(provider: P, mut config: Dns01Config) -> Self {
        if let Some((timeout, interval)) = provider.timeout() {
            config.propagation_timeout = timeout;
            config.polling_interval = interval;
        }
        Self {
            provider,
            checker: PropagationChecker::new(config),
            pre_check: None,
        }
    }

    pub fn with_pre_check(mut self, pre_check: PreCheckFn) -> Self {
        self.pre_check = Some(pre_check);
        self
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// The resolution settings in effect, provider overrides applied.
    pub fn config(&self) -> &Dns01Config {
        self.checker.config()
    }

    /// Solves every authorization of an order. All records are presented
    /// first so they propagate together, then each challenge is validated,
    /// then every presented record is cleaned up. Already-valid
    /// authorizations are skipped; anything in another non-pending state is
    /// unsalvageable and fails the order.
    pub fn solve_order(
        &self,
        client: &AcmeClient,
        authorization_urls: &[String],
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut pending = Vec::new();
        for url in authorization_urls {
            let authz = client.fetch_authorization(url, cancel)?;
            match authz.status {
                AuthorizationStatus::Valid => {
                    debug!(
                        "[dns01] authorization for {} already valid",
                        authz.identifier.value
                    );
                }
                AuthorizationStatus::Pending => pending.push(authz),
                other => bail!(
                    "authorization for {} is {other:?} and cannot be solved",
                    authz.identifier.value
                ),
            }
        }

        let mut outcome = Ok(());
        let mut presented: Vec<&Authorization> = Vec::new();
        for authz in &pending {
            if !presented.is_empty()
                && let Some(interval) = self.provider.sequential()
            {
                debug!("[dns01] provider requires {interval:?} between records");
                sleep_within(interval, cancel);
            }
            match self.pre_solve(client, authz, cancel) {
                Ok(()) => presented.push(authz),
                Err(err) => {
                    outcome = Err(err);
                    break;
                }
            }
        }

        if outcome.is_ok() {
            for authz in &pending {
                if let Err(err) = self.solve(client, authz, cancel) {
                    outcome = Err(err);
                    break;
                }
            }
        }

        // Cleanup runs for every presented record whatever the outcome; a
        // cleanup failure never masks a validation failure.
        let mut cleanup_failed = None;
        for authz in presented {
            if let Err(err) = self.clean_up(client, authz) {
                warn!(
                    "[dns01] cleanup for {} failed: {err:#}",
                    authz.identifier.value
                );
                cleanup_failed = Some(err);
            }
        }
        match (outcome, cleanup_failed) {
            (Ok(()), Some(err)) => Err(err),
            (outcome, _) => outcome,
        }
    }

    /// First phase: compute the challenge record and hand it to the
    /// provider's `present`. Does nothing for an already-valid challenge.
    pub fn pre_solve(
        &self,
        client: &AcmeClient,
        authz: &Authorization,
        cancel: &CancelToken,
    ) -> Result<()> {
        cancel.check()?;
        let record = self.record_for(client, authz)?;
        if record.challenge.status == ChallengeStatus::Valid {
            return Ok(());
        }
        info!(
            "[dns01] presenting TXT at {} for {}",
            record.record_fqdn, authz.identifier.value
        );
        self.provider
            .present(&authz.identifier.value, &record.record_fqdn, &record.value)
            .with_context(|| {
                format!("presenting the challenge record at {}", record.record_fqdn)
            })
    }

    /// Second phase: wait until the record is visible, notify the CA, and
    /// poll the challenge to a terminal status.
    pub fn solve(
        &self,
        client: &AcmeClient,
        authz: &Authorization,
        cancel: &CancelToken,
    ) -> Result<()> {
        let record = self.record_for(client, authz)?;
        if record.challenge.status == ChallengeStatus::Valid {
            return Ok(());
        }
        match &self.pre_check {
            Some(pre_check) => {
                self.await_pre_check(pre_check, &record.record_fqdn, &record.value, cancel)?
            }
            None => self
                .checker
                .wait_for_propagation(&record.record_fqdn, &record.value, cancel)?,
        }
        client.accept_challenge(&record.challenge.url, record.keyauth.as_str(), cancel)?;
        self.poll_challenge(client, record.challenge, cancel)
    }

    /// Third phase: remove the record. Run this whatever the earlier phases
    /// did, so partial DNS state is not left behind.
    pub fn clean_up(&self, client: &AcmeClient, authz: &Authorization) -> Result<()> {
        let record = self.record_for(client, authz)?;
        debug!("[dns01] cleaning up {}", record.record_fqdn);
        self.provider
            .clean_up(&authz.identifier.value, &record.record_fqdn, &record.value)
            .with_context(|| {
                format!("cleaning up the challenge record at {}", record.record_fqdn)
            })
    }

    fn record_for<'a>(
        &self,
        client: &AcmeClient,
        authz: &'a Authorization,
    ) -> Result<ChallengeRecord<'a>> {
        let domain = &authz.identifier.value;
        let challenge = authz
            .find_challenge(DNS01)
            .with_context(|| format!("no dns-01 challenge offered for {domain}"))?;
        let keyauth = KeyAuthorization::new(&challenge.token, client.signer().thumbprint());
        let value = keyauth.dns_value();
        let record_fqdn = self
            .checker
            .zones()
            .follow_cnames(&challenge_record_name(domain))
            .with_context(|| format!("resolving the challenge record name for {domain}"))?;
        Ok(ChallengeRecord {
            challenge,
            keyauth,
            value,
            record_fqdn,
        })
    }

    fn poll_challenge(
        &self,
        client: &AcmeClient,
        challenge: &Challenge,
        cancel: &CancelToken,
    ) -> Result<()> {
        let started = Instant::now();
        loop {
            let current = client.fetch_challenge(&challenge.url, cancel)?;
            match current.status {
                ChallengeStatus::Valid => {
                    info!("[dns01] challenge {} validated", challenge.url);
                    return Ok(());
                }
                ChallengeStatus::Invalid => match current.error {
                    Some(problem) => bail!("the CA rejected the challenge: {problem}"),
                    None => bail!("the CA rejected the challenge"),
                },
                ChallengeStatus::Pending | ChallengeStatus::Processing => {
                    if started.elapsed() >= CHALLENGE_POLL_TIMEOUT {
                        bail!(
                            "timed out after {:?} waiting for the CA to validate {}",
                            started.elapsed(),
                            challenge.url
                        );
                    }
                    cancel.check()?;
                    sleep_within(self.config().polling_interval, cancel);
                }
            }
        }
    }

    /// Polls the installed pre-check with the same interval and timeout the
    /// built-in propagation wait would use.
    fn await_pre_check(
        &self,
        pre_check: &PreCheckFn,
        record_fqdn: &str,
        value: &str,
        cancel: &CancelToken,
    ) -> Result<()> {
        let started = Instant::now();
        loop {
            cancel.check()?;
            match pre_check(record_fqdn, value) {
                Ok(true) => return Ok(()),
                Ok(false) => debug!("[dns01] pre-check for {record_fqdn} not ready"),
                Err(err) => debug!("[dns01] pre-check for {record_fqdn} failed: {err:#}"),
            }
            if started.elapsed() >= self.config().propagation_timeout {
                bail!(
                    "timed out after {:?} waiting for the pre-check on {record_fqdn}",
                    started.elapsed()
                );
            }
            sleep_within(self.config().polling_interval, cancel);
        }
    }
}
