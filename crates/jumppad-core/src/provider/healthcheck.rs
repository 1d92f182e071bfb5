//! Polling helpers shared by providers that wait for something to become
//! ready.

use super::ProviderContext;
use crate::concurrency::CancellationToken;
use crate::error::ProviderError;
use jumppad_schema::kinds::HealthCheck;
use std::time::{Duration, Instant};
use tracing::debug;

const SLICE: Duration = Duration::from_millis(100);

/// Delay between attempts: starts at `initial`, doubles up to `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(5),
        }
    }
}

/// Call `check` until it returns `Ok(true)` or `timeout` elapses.
///
/// `ExternalUnavailable` errors count as "not yet"; any other error ends the
/// wait immediately. Expiry is reported as `Timeout`.
pub fn poll(
    what: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    check: impl FnMut() -> Result<bool, ProviderError>,
) -> Result<(), ProviderError> {
    poll_with(Backoff::default(), what, timeout, cancel, check)
}

pub fn poll_with(
    backoff: Backoff,
    what: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    mut check: impl FnMut() -> Result<bool, ProviderError>,
) -> Result<(), ProviderError> {
    let deadline = Instant::now() + timeout;
    let mut delay = backoff.initial;
    let mut last_error: Option<ProviderError> = None;
    loop {
        if cancel.is_cancelled() {
            return Err(ProviderError::cancelled());
        }
        match check() {
            Ok(true) => return Ok(()),
            Ok(false) => {}
            Err(e) if e.is_unavailable() => {
                debug!("{what}: {e}");
                last_error = Some(e);
            }
            Err(e) => return Err(e),
        }
        let now = Instant::now();
        if now >= deadline {
            let detail = last_error.map(|e| format!(": {}", e.message)).unwrap_or_default();
            return Err(ProviderError::timeout(format!(
                "{what} not ready after {}s{detail}",
                timeout.as_secs_f32()
            )));
        }
        sleep_until(now + delay.min(deadline - now), cancel);
        delay = (delay * 2).min(backoff.max);
    }
}

fn sleep_until(until: Instant, cancel: &CancellationToken) {
    loop {
        let now = Instant::now();
        if now >= until || cancel.is_cancelled() {
            return;
        }
        std::thread::sleep(SLICE.min(until - now));
    }
}

/// Wait for every HTTP, TCP and exec check of a container to pass.
pub fn wait_for_container(
    ctx: &ProviderContext<'_>,
    container_id: &str,
    check: &HealthCheck,
) -> Result<(), ProviderError> {
    let timeout = check.timeout()?;
    let what = format!("health check for {container_id}");
    poll(&what, timeout, ctx.cancel, || {
        for http in &check.http {
            let method = if http.method.is_empty() { "GET" } else { &http.method };
            let status = ctx.clients.http.status(method, &http.address)?;
            let ok = if http.success_codes.is_empty() {
                status == 200
            } else {
                http.success_codes.contains(&status)
            };
            if !ok {
                debug!("{} returned {status}", http.address);
                return Ok(false);
            }
        }
        for tcp in &check.tcp {
            if let Err(e) = ctx.clients.http.dial(&tcp.address) {
                debug!("dial {}: {e}", tcp.address);
                return Ok(false);
            }
        }
        for script in &check.exec {
            let command = if script.command.is_empty() {
                vec!["sh".to_owned(), "-c".to_owned(), script.script.clone()]
            } else {
                script.command.clone()
            };
            let mut sink = std::io::sink();
            let code = ctx.clients.containers.exec(container_id, &command, None, &mut sink)?;
            if code != script.exit_code {
                debug!("exec check exited {code}, want {}", script.exit_code);
                return Ok(false);
            }
        }
        Ok(true)
    })
}
