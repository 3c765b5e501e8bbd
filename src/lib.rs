//! Bidirectional friendships embedded in party documents.
//!
//! Each party document carries its own array of friendship records, one per
//! counterpart. There is no join table: the two records of a pair live on
//! two documents and are kept in step by [`service::FriendshipService`].

pub mod config;
pub mod error;
pub mod friendship;
pub mod party;
pub mod query;
pub mod service;
pub mod status;
pub mod store;
pub mod utils;

pub use config::FriendsConfig;
pub use error::{FriendshipError, StoreError};
pub use friendship::{Friendship, Payload, TimeStamp};
pub use party::{AsPartyId, Entity, FieldValue, Party, PartyId};
pub use query::{Conditions, Fields, FindOptions, FriendsQuery, Sort, SortKey};
pub use service::{FriendRequest, FriendshipService, JoinedFriendship, PairState, PartyFriends};
pub use status::Status;
pub use store::sled_store::SledStore;
pub use store::{ConditionalStore, DocumentStore};
