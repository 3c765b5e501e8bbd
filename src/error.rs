use super::party::PartyId;

/// Failures raised by a document store primitive.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("sled storage failure: {0}")]
    Sled(#[from] sled::Error),
    #[error("failed to encode document: {0}")]
    Encode(String),
    #[error("failed to decode document: {0}")]
    Decode(#[from] minicbor::decode::Error),
    #[error("document store backend failure: {0}")]
    Backend(String),
}

#[derive(thiserror::Error, Debug)]
pub enum FriendshipError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("invalid friends configuration: {0}")]
    InvalidConfig(String),
    #[error("party {0} cannot request itself as a friend")]
    SelfRequest(PartyId),
    #[error("friendship of {party} for {counterpart} changed while the request was in flight")]
    Conflict {
        party: PartyId,
        counterpart: PartyId,
    },
    #[error("friendship payload codec failure: {0}")]
    Payload(String),
}

impl<E: std::fmt::Display> From<minicbor::encode::Error<E>> for StoreError {
    fn from(value: minicbor::encode::Error<E>) -> Self {
        StoreError::Encode(value.to_string())
    }
}
