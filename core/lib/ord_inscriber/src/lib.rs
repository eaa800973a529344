pub mod traits;
pub mod types;

pub mod client;
pub mod inscriber;
pub(crate) mod metrics;
pub mod signer;
