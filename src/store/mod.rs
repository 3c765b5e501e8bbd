//! The document store collaborator
//!
//! The friendship engine owns no storage. It reaches party documents only
//! through the primitives below, which any document database offering
//! point reads, single-document atomic updates, collection scans and array
//! pulls can provide. [`sled_store::SledStore`] is the embedded implementation.
pub mod sled_store;

use super::error::StoreError;
use super::friendship::Friendship;
use super::party::{Entity, Party, PartyId};
use super::query::{Filter, FindOptions, Projection, Pull, Update};
use super::status::Status;
use async_trait::async_trait;

#[async_trait]
pub trait DocumentStore<E: Entity>: Send + Sync + 'static {
    /// First document matching `filter`, shaped by `projection`.
    async fn find_one(
        &self,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Option<Party<E>>, StoreError>;

    /// Applies `update` to the first document matching `filter`, atomically
    /// for that document. Returns the document as it was before the update,
    /// or `None` when nothing matched and nothing was written.
    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: &Update,
    ) -> Result<Option<Party<E>>, StoreError>;

    /// Every document matching `filter`, ordered and paginated by `options`.
    async fn find(
        &self,
        filter: &Filter,
        projection: &Projection,
        options: &FindOptions,
    ) -> Result<Vec<Party<E>>, StoreError>;

    /// Pulls matching elements from every document matching `filter`.
    /// Returns the number of documents modified.
    async fn update_many_pull(&self, filter: &Filter, pull: &Pull) -> Result<u64, StoreError>;

    /// Declares an index on an embedded field such as `friends.id`.
    /// Stores without secondary indexes may ignore this.
    async fn ensure_index(&self, _name: &str) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Conditional single-document writes.
///
/// Closes the window between reading both sides of a friendship and
/// writing them: a write only lands if the record is still in the state
/// the planner saw.
#[async_trait]
pub trait ConditionalStore<E: Entity>: DocumentStore<E> {
    /// Appends `record` to `party`'s array at `path` unless it already holds
    /// a record for the same counterpart. Returns whether it was appended;
    /// a missing document is `false`.
    async fn push_if_absent(
        &self,
        party: PartyId,
        path: &str,
        record: &Friendship,
    ) -> Result<bool, StoreError>;

    /// Moves `party`'s record of `counterpart` from `expected` to `status`.
    /// Returns whether the record was found in `expected` and changed.
    async fn compare_and_set_status(
        &self,
        party: PartyId,
        path: &str,
        counterpart: PartyId,
        expected: Status,
        status: Status,
    ) -> Result<bool, StoreError>;
}
