//! Metadata publishing and NFT anchoring
//!
//! Both integrations are best-effort and never fail a creation request;
//! progress is tracked in the `anclaje_pendiente` outbox.

pub mod chain;
pub mod metadata;
pub mod outbox;
pub mod pinata;

pub use chain::{ChainClient, EvmChainClient, MintReceipt};
pub use outbox::{spawn_worker, AnchorService, AnchorSettings};
pub use pinata::{PinataClient, PinnedDocument, PinningService};
