//! Background forwarding-policy poller.
//!
//! # Responsibilities
//! - Periodically fetch the forwarding policy from the backend
//! - Publish every successfully fetched policy with one atomic swap
//! - Keep the previous policy when a fetch fails or times out
//!
//! # Design Decisions
//! - First fetch happens immediately, then the loop sleeps between ticks
//! - The sleep is an injected [`Sleep`] so tests can step the loop
//! - Every fetch is bounded by `fetch_timeout`
//! - Shutdown cancels the loop mid-fetch or mid-sleep

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::header::ACCEPT;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time;
use url::Url;

use crate::forwarding::policy::{ForwardingPolicy, PolicyError, PolicyStore};
use crate::observability::metrics;

/// Error from a single policy fetch.
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("policy request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("policy endpoint returned status {0}")]
    Status(u16),

    #[error("invalid policy response: {0}")]
    Body(#[from] PolicyError),

    #[error("policy request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid policy endpoint: {0}")]
    Endpoint(String),
}

/// Outcome of one fetch, consumed immediately by the poller.
pub type PollResult = Result<ForwardingPolicy, PollError>;

/// Source of forwarding policies.
///
/// Implemented for async closures returning a [`PollResult`].
pub trait PolicyFetcher: Send + Sync + 'static {
    fn fetch(&self) -> BoxFuture<'_, PollResult>;
}

impl<F, Fut> PolicyFetcher for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = PollResult> + Send + 'static,
{
    fn fetch(&self) -> BoxFuture<'_, PollResult> {
        Box::pin((self)())
    }
}

/// Fetches the policy document from the backend over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPolicyFetcher {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpPolicyFetcher {
    /// `policy_path` is appended to the backend URL verbatim, keeping any
    /// path prefix the backend URL carries.
    pub fn new(backend: &Url, policy_path: &str, timeout: Duration) -> Result<Self, PollError> {
        let raw = format!("{}{}", backend.as_str().trim_end_matches('/'), policy_path);
        let endpoint = Url::parse(&raw).map_err(|e| PollError::Endpoint(format!("{}: {}", raw, e)))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(PollError::Transport)?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn fetch_policy(&self) -> PollResult {
        let response = self
            .client
            .get(self.endpoint.clone())
            .header(ACCEPT, "application/json")
            .send()
            .await
            .map_err(PollError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            return Err(PollError::Status(status.as_u16()));
        }

        let body = response.bytes().await.map_err(PollError::Transport)?;
        Ok(ForwardingPolicy::from_body(&body)?)
    }
}

impl PolicyFetcher for HttpPolicyFetcher {
    fn fetch(&self) -> BoxFuture<'_, PollResult> {
        Box::pin(self.fetch_policy())
    }
}

/// Suspension between poll ticks.
pub trait Sleep: Send + Sync + 'static {
    fn sleep(&self, interval: Duration) -> BoxFuture<'static, ()>;
}

/// Production sleep on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleep;

impl Sleep for TokioSleep {
    fn sleep(&self, interval: Duration) -> BoxFuture<'static, ()> {
        Box::pin(time::sleep(interval))
    }
}

/// Create a sleep that parks until its [`SleepController`] releases it.
pub fn stepped() -> (SteppedSleep, SleepController) {
    let (parked_tx, parked_rx) = mpsc::channel(1);
    let (release_tx, release_rx) = mpsc::channel(1);

    (
        SteppedSleep {
            parked: parked_tx,
            release: Arc::new(Mutex::new(release_rx)),
        },
        SleepController {
            parked: parked_rx,
            release: release_tx,
        },
    )
}

/// Sleep that reports "about to sleep" and waits for an explicit release.
#[derive(Debug, Clone)]
pub struct SteppedSleep {
    parked: mpsc::Sender<()>,
    release: Arc<Mutex<mpsc::Receiver<()>>>,
}

impl Sleep for SteppedSleep {
    fn sleep(&self, _interval: Duration) -> BoxFuture<'static, ()> {
        let parked = self.parked.clone();
        let release = self.release.clone();

        Box::pin(async move {
            // With the controller gone the loop stays parked until shutdown.
            if parked.send(()).await.is_err() {
                return std::future::pending().await;
            }
            let mut release = release.lock().await;
            if release.recv().await.is_none() {
                std::future::pending::<()>().await;
            }
        })
    }
}

/// Test-side handle driving a [`SteppedSleep`].
#[derive(Debug)]
pub struct SleepController {
    parked: mpsc::Receiver<()>,
    release: mpsc::Sender<()>,
}

impl SleepController {
    /// Wait until the poller has finished a tick and entered its sleep.
    pub async fn wait_parked(&mut self) {
        let _ = self.parked.recv().await;
    }

    /// Release the poller for one more tick and wait until that tick's
    /// result has been handled and the loop is parked again.
    pub async fn step(&mut self) {
        let _ = self.release.send(()).await;
        self.wait_parked().await;
    }
}

/// Background loop keeping a [`PolicyStore`] up to date.
pub struct Poller {
    fetcher: Arc<dyn PolicyFetcher>,
    store: PolicyStore,
    interval: Duration,
    fetch_timeout: Duration,
    sleeper: Arc<dyn Sleep>,
}

impl Poller {
    pub fn builder(fetcher: impl PolicyFetcher, store: PolicyStore) -> PollerBuilder {
        PollerBuilder {
            fetcher: Arc::new(fetcher),
            store,
            interval: Duration::from_secs(10),
            fetch_timeout: Duration::from_secs(5),
            sleeper: Arc::new(TokioSleep),
        }
    }

    /// Run one tick: fetch, then publish on success.
    ///
    /// On failure the published policy is left untouched.
    pub async fn poll_once(&self) -> Result<Arc<ForwardingPolicy>, PollError> {
        let outcome = match time::timeout(self.fetch_timeout, self.fetcher.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(PollError::Timeout(self.fetch_timeout)),
        };

        match outcome {
            Ok(policy) => {
                let enabled = policy.enabled();
                let previous = self.store.publish(policy);
                let current = self.store.snapshot();

                if !previous.same_target(&current) {
                    tracing::info!(
                        enabled,
                        target = current.target().map(Url::as_str).unwrap_or("-"),
                        "Forwarding policy changed"
                    );
                } else {
                    tracing::debug!(enabled, "Forwarding policy unchanged");
                }

                metrics::record_poll("success");
                metrics::record_forwarding_enabled(enabled);
                Ok(current)
            }
            Err(e) => {
                let stale = self.store.snapshot();
                tracing::warn!(
                    error = %e,
                    forwarding_enabled = stale.enabled(),
                    "Policy fetch failed, keeping previous policy"
                );
                metrics::record_poll("failure");
                Err(e)
            }
        }
    }

    /// Poll until the shutdown signal fires.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            interval_secs = self.interval.as_secs_f64(),
            fetch_timeout_secs = self.fetch_timeout.as_secs_f64(),
            "Policy poller starting"
        );

        loop {
            tokio::select! {
                _ = self.poll_once() => {}
                _ = shutdown.recv() => {
                    break;
                }
            }

            tokio::select! {
                _ = self.sleeper.sleep(self.interval) => {}
                _ = shutdown.recv() => {
                    break;
                }
            }
        }

        tracing::info!("Policy poller received shutdown signal, exiting loop");
    }

    pub fn spawn(self, shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

/// Builder for [`Poller`].
pub struct PollerBuilder {
    fetcher: Arc<dyn PolicyFetcher>,
    store: PolicyStore,
    interval: Duration,
    fetch_timeout: Duration,
    sleeper: Arc<dyn Sleep>,
}

impl PollerBuilder {
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn sleeper(mut self, sleeper: impl Sleep) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    pub fn build(self) -> Poller {
        Poller {
            fetcher: self.fetcher,
            store: self.store,
            interval: self.interval,
            fetch_timeout: self.fetch_timeout,
            sleeper: self.sleeper,
        }
    }
}
