use thiserror::Error;

/// Error types for contract creation.
///
/// The scheduling fast paths report nothing beyond `Option`/`bool`; creation
/// is the one operation where callers routinely want to tell a full group
/// apart from a stopped one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CreateContractError {
    /// Every slot is taken by a live contract.
    #[error("all {capacity} contract slots are in use")]
    CapacityExhausted {
        /// The group's fixed capacity.
        capacity: u64,
    },
    /// The group has been stopped.
    #[error("work-contract group has been stopped")]
    Stopped,
}
