//! Consumer-facing paywall facade.
//!
//! [`Paywall`] mirrors the session: whenever the identity changes it
//! re-queries memberships and publishes the outcome through a watch channel.
//! An identity change while a query is in flight drops the stale query
//! outright, so a slow result for a previous user can never overwrite the
//! state of the current one. Query failures surface as a partial-failure
//! flag, never a panic into the host.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, warn};

use crate::checkout::{authenticate_url, checkout_url, CheckoutConfig};
use crate::ledger::LockConnector;
use crate::memberships::get_memberships;
use crate::ports::{Environment, Navigator};
use crate::session::SessionHandle;
use crate::{Address, Membership, PaywallConfig, Result};

/// Snapshot of the paywall's derived state.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PaywallState {
    /// Whether a membership query is in flight.
    pub loading: bool,
    /// Memberships found for the current user; replaced wholesale on every
    /// re-query, cleared immediately when the session empties.
    pub memberships: Vec<Membership>,
    /// Whether the last query lost information to failing locks. A `true`
    /// here means "inconclusive", not "not a member".
    pub partial_failure: bool,
    /// The authenticated user, if any.
    pub user: Option<Address>,
    /// The session code, if any.
    pub code: Option<String>,
}

impl PaywallState {
    /// Whether any membership is currently unexpired.
    ///
    /// Derived, never stored: the comparison runs against the wall clock at
    /// call time.
    pub fn is_authorized(&self) -> bool {
        self.is_authorized_at(now_ms())
    }

    /// Authorization against an explicit clock reading, for deterministic
    /// tests.
    pub fn is_authorized_at(&self, now_ms: u64) -> bool {
        self.memberships.iter().any(|m| m.is_valid_at(now_ms))
    }
}

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// The paywall facade bound to one config and one session.
///
/// Construction spawns a driver task onto the ambient tokio runtime; the
/// task is aborted when the `Paywall` is dropped.
pub struct Paywall {
    config: PaywallConfig,
    session: SessionHandle,
    navigator: Arc<dyn Navigator>,
    checkout: CheckoutConfig,
    state_rx: watch::Receiver<PaywallState>,
    driver: tokio::task::JoinHandle<()>,
}

impl Paywall {
    /// Bind a paywall to `config`, watching `session` for identity changes.
    pub fn new(
        config: PaywallConfig,
        session: SessionHandle,
        connector: Arc<dyn LockConnector>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self::with_checkout_config(config, session, connector, navigator, CheckoutConfig::default())
    }

    /// Same as [`Paywall::new`] with a custom checkout endpoint.
    pub fn with_checkout_config(
        config: PaywallConfig,
        session: SessionHandle,
        connector: Arc<dyn LockConnector>,
        navigator: Arc<dyn Navigator>,
        checkout: CheckoutConfig,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(PaywallState::default());
        let driver = tokio::spawn(drive(config.clone(), session.clone(), connector, state_tx));
        Self {
            config,
            session,
            navigator,
            checkout,
            state_rx,
            driver,
        }
    }

    /// The current state snapshot.
    pub fn state(&self) -> PaywallState {
        self.state_rx.borrow().clone()
    }

    /// Subscribe to state updates.
    pub fn subscribe(&self) -> watch::Receiver<PaywallState> {
        self.state_rx.clone()
    }

    /// Redirect to the hosted checkout's sign-in flow. Side effect only;
    /// the page is left behind.
    pub fn authenticate(&self, env: &dyn Environment) {
        let url = authenticate_url(&self.checkout, &env.current_url());
        self.navigator.redirect(&url);
    }

    /// Redirect to the hosted checkout's purchase flow, using
    /// `config_override` when supplied. The outgoing config is always
    /// forced pessimistic; an existing session code is re-embedded so the
    /// session survives the round trip.
    pub fn checkout(
        &self,
        config_override: Option<&PaywallConfig>,
        env: &dyn Environment,
    ) -> Result<()> {
        let config = config_override.unwrap_or(&self.config);
        let url = checkout_url(
            &self.checkout,
            config,
            self.session.code().as_deref(),
            &env.current_url(),
        )?;
        self.navigator.redirect(&url);
        Ok(())
    }
}

impl Drop for Paywall {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Driver loop: one cycle per observed session value.
///
/// The membership query races the next session change inside `select!`;
/// losing the race drops the query future, cancelling its pending reads,
/// and the loop starts a fresh cycle for the new identity.
async fn drive(
    config: PaywallConfig,
    mut session: SessionHandle,
    connector: Arc<dyn LockConnector>,
    state_tx: watch::Sender<PaywallState>,
) {
    loop {
        let snapshot = session.current();
        let user = snapshot.user().cloned();
        let code = snapshot.code().map(str::to_string);

        match user {
            None => {
                // Memberships clear immediately, without waiting for any
                // in-flight query (that future was dropped by the select
                // below before we got here).
                state_tx.send_replace(PaywallState::default());
            }
            Some(user) if config.locks.is_empty() => {
                state_tx.send_replace(PaywallState {
                    user: Some(user),
                    code,
                    ..PaywallState::default()
                });
            }
            Some(user) => {
                state_tx.send_modify(|state| {
                    state.loading = true;
                    state.user = Some(user.clone());
                    state.code = code.clone();
                });

                tokio::select! {
                    report = get_memberships(&config, Some(&user), connector.as_ref()) => {
                        if report.is_partial() {
                            warn!(
                                failed_locks = report.failures.len(),
                                "membership query lost locks; result is inconclusive"
                            );
                        }
                        state_tx.send_replace(PaywallState {
                            loading: false,
                            partial_failure: report.is_partial(),
                            memberships: report.memberships,
                            user: Some(user),
                            code,
                        });
                    }
                    alive = session.changed() => {
                        if !alive {
                            return;
                        }
                        debug!("identity changed mid-query; discarding stale result");
                        continue;
                    }
                }
            }
        }

        if !session.changed().await {
            return;
        }
    }
}
