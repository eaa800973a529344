pub use self::inscriber::{IndexerKind, InscriberConfig, RevealFailurePolicy};

pub mod inscriber;
