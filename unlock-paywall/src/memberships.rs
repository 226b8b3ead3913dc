//! Membership query fan-out.
//!
//! For each configured lock (concurrently, unordered): resolve its network,
//! count the user's keys, then fetch every token id and its expiration, also
//! concurrently. The result is the union across locks; a failing lock
//! contributes zero memberships plus a [`LockFailure`] so an RPC outage is
//! never mistaken for "not a member".

use futures::future::join_all;
use tracing::debug;

use crate::ledger::LockConnector;
use crate::{
    Address, LockAddress, LockConfig, LockFailure, Membership, MembershipReport, NetworkId,
    PaywallConfig, Result, UnlockError,
};

/// Compute all memberships `user` holds across the config's locks.
///
/// A `None` user short-circuits to an empty report without touching the
/// connector. Ordering of the returned memberships is unspecified.
pub async fn get_memberships(
    config: &PaywallConfig,
    user: Option<&Address>,
    connector: &dyn LockConnector,
) -> MembershipReport {
    let Some(user) = user else {
        return MembershipReport::default();
    };

    let per_lock = config
        .locks
        .iter()
        .map(|(lock, lock_config)| query_lock(config, lock, lock_config, user, connector));

    let mut report = MembershipReport::default();
    for outcome in join_all(per_lock).await {
        match outcome {
            Ok(mut memberships) => report.memberships.append(&mut memberships),
            Err(failure) => report.failures.push(failure),
        }
    }
    debug!(
        memberships = report.memberships.len(),
        failed_locks = report.failures.len(),
        "membership query resolved"
    );
    report
}

async fn query_lock(
    config: &PaywallConfig,
    lock: &LockAddress,
    lock_config: &LockConfig,
    user: &Address,
    connector: &dyn LockConnector,
) -> std::result::Result<Vec<Membership>, LockFailure> {
    // Lock-level override wins; otherwise the config-level default.
    let Some(network) = lock_config.network.or(config.network) else {
        return Err(LockFailure {
            lock: lock.clone(),
            network: None,
            error: UnlockError::MissingNetwork { lock: lock.clone() },
        });
    };

    lock_memberships(connector, network, lock, user)
        .await
        .map_err(|error| LockFailure {
            lock: lock.clone(),
            network: Some(network),
            error,
        })
}

async fn lock_memberships(
    connector: &dyn LockConnector,
    network: NetworkId,
    lock: &LockAddress,
    user: &Address,
) -> Result<Vec<Membership>> {
    let reader = connector.reader(network, lock)?;
    let count = reader.total_keys(user).await?;

    let per_key = (0..count).map(|index| {
        let reader = reader.clone();
        async move {
            let token_id = reader.token_of_owner_by_index(user, index).await?;
            let expiration = reader.key_expiration_timestamp_for(&token_id).await?;
            Ok(Membership {
                network,
                lock: lock.clone(),
                token_id,
                expiration,
            })
        }
    });

    join_all(per_key).await.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{test_lock, test_user, MockConnector};

    fn config_with(lock: LockAddress, network: Option<NetworkId>) -> PaywallConfig {
        PaywallConfig::new("t", network).with_lock(lock, None)
    }

    #[tokio::test]
    async fn anonymous_user_issues_no_ledger_calls() {
        let lock = test_lock(1);
        let connector = MockConnector::new();
        connector.add_keys(NetworkId(1), &lock, &test_user(1), &[(1, u64::MAX)]);

        let report =
            get_memberships(&config_with(lock, Some(NetworkId(1))), None, &connector).await;

        assert!(report.memberships.is_empty());
        assert!(!report.is_partial());
        assert_eq!(connector.call_count(), 0);
    }

    #[tokio::test]
    async fn missing_network_is_a_failure_not_a_read() {
        let lock = test_lock(2);
        let connector = MockConnector::new();
        let user = test_user(1);

        let report = get_memberships(&config_with(lock.clone(), None), Some(&user), &connector).await;

        assert!(report.memberships.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(
            report.failures[0].error,
            UnlockError::MissingNetwork { lock }
        );
        assert_eq!(connector.call_count(), 0);
    }

    #[tokio::test]
    async fn lock_level_network_overrides_the_default() {
        let lock = test_lock(3);
        let user = test_user(2);
        let connector = MockConnector::new();
        // Keys installed on network 10 only; the config default says 1.
        connector.add_keys(NetworkId(10), &lock, &user, &[(7, 1_900_000_000)]);

        let config =
            PaywallConfig::new("t", Some(NetworkId(1))).with_lock(lock, Some(NetworkId(10)));
        let report = get_memberships(&config, Some(&user), &connector).await;

        assert_eq!(report.memberships.len(), 1);
        assert_eq!(report.memberships[0].network, NetworkId(10));
    }

    #[tokio::test]
    async fn failing_lock_is_reported_alongside_good_results() {
        let good = test_lock(4);
        let bad = test_lock(5);
        let user = test_user(3);
        let connector = MockConnector::new();
        connector.add_keys(NetworkId(1), &good, &user, &[(1, 2_000_000_000)]);
        connector.fail_lock(NetworkId(1), &bad);

        let config = PaywallConfig::new("t", Some(NetworkId(1)))
            .with_lock(good.clone(), None)
            .with_lock(bad.clone(), None);
        let report = get_memberships(&config, Some(&user), &connector).await;

        assert_eq!(report.memberships.len(), 1);
        assert_eq!(report.memberships[0].lock, good);
        assert!(report.is_partial());
        assert_eq!(report.failures[0].lock, bad);
        assert!(matches!(
            report.failures[0].error,
            UnlockError::LedgerRead { .. }
        ));
    }

    #[tokio::test]
    async fn unknown_owner_reads_as_zero_keys_not_a_failure() {
        let lock = test_lock(6);
        let connector = MockConnector::new();
        connector.add_keys(NetworkId(1), &lock, &test_user(4), &[(1, 2_000_000_000)]);

        let stranger = test_user(5);
        let report = get_memberships(
            &config_with(lock, Some(NetworkId(1))),
            Some(&stranger),
            &connector,
        )
        .await;

        assert!(report.memberships.is_empty());
        assert!(!report.is_partial());
    }
}
