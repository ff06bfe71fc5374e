use crate::claim::{Address, ClaimSigner, SignedClaim};
use crate::config::Config;
use crate::error::GatewayError;
use crate::rate_limit::ClickRateLimiter;
use crate::registry::{TokenGuard, TokenRegistry};
use crate::store::CounterStore;
use crate::token::SessionToken;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Accepted click
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ClickAccepted {
    pub token: SessionToken,
    pub clicks: u64,
}

/// Refused click. `token` and `clicks` are echoed back when known.
#[derive(Debug)]
pub struct ClickRejected {
    pub error: GatewayError,
    pub token: Option<SessionToken>,
    pub clicks: Option<u64>,
}

impl ClickRejected {
    fn bare(error: GatewayError) -> Self {
        Self {
            error,
            token: None,
            clicks: None,
        }
    }
}

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub counters: Arc<dyn CounterStore>,
    pub registry: TokenRegistry,
    pub rate_limiter: ClickRateLimiter,
    pub signer: Arc<ClaimSigner>,
    pub behind_proxy: bool,
}

impl AppState {
    pub fn new(
        counters: Arc<dyn CounterStore>,
        signer: ClaimSigner,
        min_click_interval: Duration,
        behind_proxy: bool,
    ) -> Self {
        Self {
            counters,
            registry: TokenRegistry::new(),
            rate_limiter: ClickRateLimiter::new(min_click_interval),
            signer: Arc::new(signer),
            behind_proxy,
        }
    }

    /// Unlock the signer and connect the counter store.
    ///
    /// Either failing stops startup.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let provider = config.signing_key_provider()?;
        let signer = provider
            .unlock()
            .map_err(|error| GatewayError::SignerUnavailable(error.to_string()))?;
        info!(address = %signer.address(), "Signer ready");

        let counters = config.counter_backend()?.build().await?;

        Ok(Self::new(
            counters,
            signer,
            config.min_click_interval(),
            config.behind_proxy,
        ))
    }

    pub fn signer_address(&self) -> Address {
        self.signer.address()
    }

    async fn count(&self, token: &SessionToken) -> Result<u64, GatewayError> {
        self.counters.get(token).await.map_err(|error| {
            error!(%token, ?error, "Failed to read click count");
            GatewayError::Store(error)
        })
    }

    /// Current click count, never locks or mutates
    pub async fn clicks(&self, token: &SessionToken) -> Result<u64, GatewayError> {
        self.count(token).await
    }

    /// Count one click.
    ///
    /// `requested` is whatever token the client sent. A missing, malformed
    /// or never-clicked token is replaced by a freshly minted one; a token
    /// held by another request is refused without any mutation.
    pub async fn click(
        &self,
        requested: Option<&str>,
        addr: IpAddr,
    ) -> Result<ClickAccepted, ClickRejected> {
        let presented = match requested {
            Some(raw) => match raw.parse::<SessionToken>() {
                Ok(token) => Some(token),
                Err(_) => {
                    warn!(token = raw, "Given token is invalid");
                    None
                }
            },
            None => None,
        };

        let (guard, current) = match presented {
            Some(token) => {
                let Some(guard) = self.registry.try_lock(token) else {
                    warn!(%token, "Token locked");
                    return Err(ClickRejected {
                        error: GatewayError::LockContention,
                        token: Some(token),
                        clicks: None,
                    });
                };

                let clicks = self.count(&token).await.map_err(ClickRejected::bare)?;
                if clicks == 0 {
                    debug!(%token, "Token has no clicks, replacing");
                    drop(guard);
                    (self.registry.issue_locked(), None)
                } else {
                    (guard, Some(clicks))
                }
            }
            None => (self.registry.issue_locked(), None),
        };

        self.count_click(guard, current, addr).await
    }

    async fn count_click(
        &self,
        guard: TokenGuard,
        current: Option<u64>,
        addr: IpAddr,
    ) -> Result<ClickAccepted, ClickRejected> {
        let token = *guard.token();
        let now = Instant::now();

        if !self.rate_limiter.admit(&token, addr, now) {
            warn!(%token, %addr, "Clicking too often");
            return Err(ClickRejected {
                error: GatewayError::RateLimited,
                token: Some(token),
                clicks: current,
            });
        }

        let clicks = self.counters.increment(&token).await.map_err(|error| {
            error!(%token, ?error, "Failed to increment click count");
            ClickRejected::bare(GatewayError::Store(error))
        })?;
        self.rate_limiter.record(&token, addr, now);
        debug!(%token, clicks, "Click counted");

        Ok(ClickAccepted { token, clicks })
    }

    /// Sign a claim over the token's current count.
    ///
    /// Does not touch the count, so repeating it at the same count returns
    /// the identical claim and signature.
    pub async fn claim(
        &self,
        token: SessionToken,
        recipient: Address,
        contract: Address,
    ) -> Result<SignedClaim, GatewayError> {
        let Some(_guard) = self.registry.try_lock(token) else {
            warn!(%token, "Token locked");
            return Err(GatewayError::LockContention);
        };

        let clicks = self.count(&token).await?;
        if clicks == 0 {
            debug!(%token, "Claim for token without clicks");
            return Err(GatewayError::NotFound);
        }

        let claim = self
            .signer
            .sign_claim(recipient, token, clicks, contract)
            .map_err(|error| {
                error!(%token, %error, "Failed to sign claim");
                GatewayError::SignerUnavailable(error.to_string())
            })?;

        info!(%token, %recipient, %contract, clicks, "Claim signed");
        Ok(claim)
    }
}
