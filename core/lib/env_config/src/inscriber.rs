use ord_config::InscriberConfig;

use crate::{envy_load, FromEnv};

impl FromEnv for InscriberConfig {
    fn from_env() -> anyhow::Result<Self> {
        envy_load("ord_inscriber", "ORD_INSCRIBER_")
    }
}

#[cfg(test)]
mod tests {
    use ord_config::{IndexerKind, RevealFailurePolicy};

    use super::*;
    use crate::test_utils::EnvMutex;

    static MUTEX: EnvMutex = EnvMutex::new();

    #[test]
    fn inscriber_from_env() {
        let mut lock = MUTEX.lock();
        let config = r#"
            ORD_INSCRIBER_NETWORK="regtest"
            ORD_INSCRIBER_INDEXER="rpc"
            ORD_INSCRIBER_INDEXER_URL="http://localhost:18443"
            ORD_INSCRIBER_RPC_USER="rpcuser"
            ORD_INSCRIBER_RPC_PASSWORD="rpcpassword"
            ORD_INSCRIBER_POLL_INTERVAL=1000
            ORD_INSCRIBER_MAX_CONFIRMATION_WAIT=600000
            ORD_INSCRIBER_FEE_RATE=5
            ORD_INSCRIBER_REVEAL_FAILURE_POLICY="fail_fast"
        "#;

        lock.set_env(config);

        let actual = InscriberConfig::from_env().unwrap();
        let for_tests = InscriberConfig::for_tests();

        assert_eq!(actual, for_tests);
    }

    #[test]
    fn optional_fields_can_be_omitted() {
        let mut lock = MUTEX.lock();
        lock.remove_env(&[
            "ORD_INSCRIBER_INDEXER_URL",
            "ORD_INSCRIBER_RPC_USER",
            "ORD_INSCRIBER_RPC_PASSWORD",
            "ORD_INSCRIBER_MAX_CONFIRMATION_WAIT",
            "ORD_INSCRIBER_REVEAL_FAILURE_POLICY",
        ]);
        let config = r#"
            ORD_INSCRIBER_NETWORK="testnet"
            ORD_INSCRIBER_INDEXER="esplora"
            ORD_INSCRIBER_POLL_INTERVAL=60000
            ORD_INSCRIBER_FEE_RATE=5
        "#;

        lock.set_env(config);

        let actual = InscriberConfig::from_env().unwrap();
        assert_eq!(actual.indexer, IndexerKind::Esplora);
        assert_eq!(actual.indexer_url(), None);
        assert_eq!(actual.max_confirmation_wait(), None);
        assert_eq!(
            actual.reveal_failure_policy(),
            RevealFailurePolicy::ContinueOnError
        );
    }
}
