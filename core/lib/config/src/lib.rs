pub use crate::configs::{InscriberConfig, IndexerKind, RevealFailurePolicy};

pub mod configs;
