use ord_config::{IndexerKind, InscriberConfig};

use crate::{
    traits::ChainIndexer,
    types::{BitcoinIndexerResult, InscriberError, NodeAuth},
};

mod esplora;
mod rpc_client;

pub use esplora::MempoolClient;
pub use rpc_client::BitcoinRpcIndexer;

/// Builds the indexer backend selected by `config`.
pub fn create_indexer(config: &InscriberConfig) -> BitcoinIndexerResult<Box<dyn ChainIndexer>> {
    match config.indexer {
        IndexerKind::Esplora => Ok(Box::new(MempoolClient::new(
            config.network(),
            config.indexer_url(),
        )?)),
        IndexerKind::Rpc => {
            let url = config.indexer_url().ok_or_else(|| {
                InscriberError::InvalidConfig("RPC indexer requires an indexer URL".to_string())
            })?;
            let auth = match (&config.rpc_user, &config.rpc_password) {
                (Some(user), Some(password)) => NodeAuth::UserPass(user.clone(), password.clone()),
                _ => NodeAuth::None,
            };
            Ok(Box::new(BitcoinRpcIndexer::new(url, auth)?))
        }
    }
}
