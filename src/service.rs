//! Service layer API for friendship operations
//!
//! [`FriendshipService`] is the collection-level surface: every operation
//! names both parties. [`PartyFriends`] is the same surface bound to one
//! party, delegating with that party as the first argument.
//!
//! Each pairwise operation touches two documents. Reads and writes on the
//! two sides are issued together and both are awaited before returning;
//! the first failure, in side order, is reported. A failed side does not
//! undo the other side, so after an error the pair must be re-read (see
//! [`FriendshipService::inspect_pair`]) rather than assumed untouched.
use super::config::{FriendsConfig, FriendsPath};
use super::error::{FriendshipError, StoreError};
use super::friendship::{Friendship, Payload, TimeStamp};
use super::party::{AsPartyId, Entity, Party, PartyId};
use super::query::{Filter, FriendsQuery};
use super::status::{Status, Step, is_consistent_pair, plan_request};
use super::store::{ConditionalStore, DocumentStore};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Both records after a friend request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendRequest {
    /// The requestee's record of the requester.
    pub friend: Friendship,
    /// The requester's record of the requestee.
    pub friender: Friendship,
}

/// A friend as seen from the querying party: its own record's fields plus
/// the counterpart document.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinedFriendship<E> {
    pub status: Status,
    pub added: TimeStamp,
    pub data: Option<Payload>,
    pub friend: Party<E>,
}

/// Both sides of a pair as currently stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairState {
    pub first: PartyId,
    pub second: PartyId,
    /// `first`'s record of `second`.
    pub first_record: Option<Friendship>,
    /// `second`'s record of `first`.
    pub second_record: Option<Friendship>,
}

impl PairState {
    pub fn is_consistent(&self) -> bool {
        is_consistent_pair(
            self.first_record.as_ref().map(|r| r.status),
            self.second_record.as_ref().map(|r| r.status),
        )
    }
    pub fn are_friends(&self) -> bool {
        let accepted = |r: &Option<Friendship>| {
            r.as_ref().is_some_and(|r| r.status == Status::Accepted)
        };
        accepted(&self.first_record) && accepted(&self.second_record)
    }
}

pub struct FriendshipService<E, S> {
    store: Arc<S>,
    path: FriendsPath,
    _entity: PhantomData<fn() -> E>,
}

impl<E, S> Clone for FriendshipService<E, S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            path: self.path.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity, S: DocumentStore<E>> FriendshipService<E, S> {
    /// Attach friendship handling to a store of `E` documents.
    ///
    /// Validates the configuration and, when `do_index` is set, declares the
    /// `<path>.id` index before any operation runs.
    pub async fn attach(store: Arc<S>, config: FriendsConfig) -> Result<Self, FriendshipError> {
        let path = config.validate()?;

        if config.do_index {
            store.ensure_index(&path.index_name()).await?;
        }
        tracing::debug!(path = path.name(), do_index = config.do_index, "friends attached");

        Ok(Self {
            store,
            path,
            _entity: PhantomData,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn path(&self) -> &FriendsPath {
        &self.path
    }

    /// Operations bound to one party.
    pub fn party(&self, party: impl AsPartyId) -> PartyFriends<'_, E, S> {
        PartyFriends {
            service: self,
            party: party.party_id(),
        }
    }

    /// `party`'s record of `counterpart`. A missing document or a missing
    /// record are both `None`.
    async fn friendship_between(
        &self,
        party: PartyId,
        counterpart: PartyId,
    ) -> Result<Option<Friendship>, StoreError> {
        let doc = self
            .store
            .find_one(
                &Filter::by_id(party),
                &self.path.record_projection(counterpart),
            )
            .await?;

        Ok(doc.and_then(|doc| doc.friendships.into_iter().find(|f| f.id == counterpart)))
    }

    async fn create_friendship(
        &self,
        party: PartyId,
        record: Friendship,
    ) -> Result<Friendship, StoreError> {
        let previous = self
            .store
            .find_one_and_update(&Filter::by_id(party), &self.path.push(record.clone()))
            .await?;
        if previous.is_none() {
            tracing::warn!(%party, counterpart = %record.id, "no party document to add friendship to");
        }
        Ok(record)
    }

    async fn update_friendship(
        &self,
        party: PartyId,
        record: Friendship,
    ) -> Result<Friendship, StoreError> {
        let previous = self
            .store
            .find_one_and_update(
                &self.path.record_filter(party, record.id),
                &self.path.set_status(record.id, record.status),
            )
            .await?;
        if previous.is_none() {
            tracing::warn!(%party, counterpart = %record.id, "no friendship left to update");
        }
        Ok(record)
    }

    async fn apply(&self, party: PartyId, step: Step) -> Result<Friendship, StoreError> {
        match step {
            Step::Keep(record) => Ok(record),
            Step::Update(record) => self.update_friendship(party, record).await,
            Step::Create(record) => self.create_friendship(party, record).await,
        }
    }

    /// Send a friend request from `requester` to `requestee`.
    ///
    /// A first request leaves the requester `Requested` and the requestee
    /// `Pending`. Requesting back accepts both sides. Requests that would
    /// not change a side issue no write for it, so repeating a request is a
    /// no-op. `data` is stored on any record this call creates.
    #[tracing::instrument(
        skip_all,
        fields(requester = %requester.party_id(), requestee = %requestee.party_id())
    )]
    pub async fn request_friend(
        &self,
        requester: impl AsPartyId,
        requestee: impl AsPartyId,
        data: Option<Payload>,
    ) -> Result<FriendRequest, FriendshipError> {
        let (requester, requestee) = (requester.party_id(), requestee.party_id());
        if requester == requestee {
            return Err(FriendshipError::SelfRequest(requester));
        }

        let (local, remote) = tokio::join!(
            self.friendship_between(requester, requestee),
            self.friendship_between(requestee, requester),
        );
        let plan = plan_request(requester, requestee, local?, remote?, data, TimeStamp::new());
        tracing::debug!(
            local = plan.local.as_str(),
            remote = plan.remote.as_str(),
            status = %plan.local.record().status,
            "planned friend request"
        );

        let (friend, friender) = tokio::join!(
            self.apply(requestee, plan.remote),
            self.apply(requester, plan.local),
        );

        Ok(FriendRequest {
            friend: friend?,
            friender: friender?,
        })
    }

    /// Friends of `party` matching `query`, from `party`'s point of view.
    ///
    /// Sorting and pagination in `query.options` apply to the counterpart
    /// documents before they are joined with `party`'s own records.
    #[tracing::instrument(skip_all, fields(party = %party.party_id()))]
    pub async fn get_friends(
        &self,
        party: impl AsPartyId,
        query: FriendsQuery,
    ) -> Result<Vec<JoinedFriendship<E>>, FriendshipError> {
        let party = party.party_id();
        let FriendsQuery {
            conditions,
            fields,
            options,
        } = query;
        let filter = conditions.translate(&self.path, party);
        let projection = fields.projection();

        let (candidates, locals) = tokio::join!(
            self.store.find(&filter, &projection, &options),
            self.local_friendships(party),
        );
        let (candidates, mut locals) = (candidates?, locals?);

        let mut joined = Vec::with_capacity(candidates.len());
        for friend in candidates {
            match locals.remove(&friend.id) {
                Some(local) => joined.push(JoinedFriendship {
                    status: local.status,
                    added: local.added,
                    data: local.data,
                    friend,
                }),
                None => {
                    tracing::warn!(friend = %friend.id, "counterpart holds a friendship with no local record, skipping");
                }
            }
        }
        Ok(joined)
    }

    pub async fn get_pending_friends(
        &self,
        party: impl AsPartyId,
        query: FriendsQuery,
    ) -> Result<Vec<JoinedFriendship<E>>, FriendshipError> {
        self.get_friends(party, query.with_status(Status::Pending))
            .await
    }

    pub async fn get_accepted_friends(
        &self,
        party: impl AsPartyId,
        query: FriendsQuery,
    ) -> Result<Vec<JoinedFriendship<E>>, FriendshipError> {
        self.get_friends(party, query.with_status(Status::Accepted))
            .await
    }

    pub async fn get_requested_friends(
        &self,
        party: impl AsPartyId,
        query: FriendsQuery,
    ) -> Result<Vec<JoinedFriendship<E>>, FriendshipError> {
        self.get_friends(party, query.with_status(Status::Requested))
            .await
    }

    /// Whether `first` holds an accepted friendship with `second`.
    /// Never fails: lookup errors read as "not friends".
    pub async fn are_friends(&self, first: impl AsPartyId, second: impl AsPartyId) -> bool {
        let (first, second) = (first.party_id(), second.party_id());

        match self.friendship_between(first, second).await {
            Ok(record) => record.is_some_and(|r| r.status == Status::Accepted),
            Err(error) => {
                tracing::warn!(%first, %second, %error, "friendship lookup failed, reporting not friends");
                false
            }
        }
    }

    /// Removes the pair's records from both documents, whatever their status.
    #[tracing::instrument(skip_all, fields(first = %first.party_id(), second = %second.party_id()))]
    pub async fn remove_friend(
        &self,
        first: impl AsPartyId,
        second: impl AsPartyId,
    ) -> Result<(), FriendshipError> {
        let (first, second) = (first.party_id(), second.party_id());
        let (first_doc, second_doc) = (Filter::by_id(first), Filter::by_id(second));
        let (pull_second, pull_first) = (self.path.pull(second), self.path.pull(first));

        let (first_pulled, second_pulled) = tokio::join!(
            self.store.update_many_pull(&first_doc, &pull_second),
            self.store.update_many_pull(&second_doc, &pull_first),
        );
        let (first_pulled, second_pulled) = (first_pulled?, second_pulled?);
        tracing::debug!(first_pulled, second_pulled, "friendship removed");

        Ok(())
    }

    /// Reads both sides of a pair.
    pub async fn inspect_pair(
        &self,
        first: impl AsPartyId,
        second: impl AsPartyId,
    ) -> Result<PairState, FriendshipError> {
        let (first, second) = (first.party_id(), second.party_id());

        let (first_record, second_record) = tokio::join!(
            self.friendship_between(first, second),
            self.friendship_between(second, first),
        );

        Ok(PairState {
            first,
            second,
            first_record: first_record?,
            second_record: second_record?,
        })
    }

    async fn local_friendships(
        &self,
        party: PartyId,
    ) -> Result<HashMap<PartyId, Friendship>, StoreError> {
        let doc = self
            .store
            .find_one(&Filter::by_id(party), &self.path.records_projection())
            .await?;

        Ok(doc
            .map(|doc| doc.friendships.into_iter().map(|f| (f.id, f)).collect())
            .unwrap_or_default())
    }
}

impl<E: Entity, S: ConditionalStore<E>> FriendshipService<E, S> {
    /// [`request_friend`](Self::request_friend) with conditional writes.
    ///
    /// Each write only lands if its record is still in the state read at
    /// the start of the call: creates require the record to still be
    /// absent, updates require the status to be unchanged. If another
    /// writer got there first the call fails with
    /// [`FriendshipError::Conflict`] and the caller may retry. The side that
    /// did land is kept. A missing party document also reads as a conflict.
    #[tracing::instrument(
        skip_all,
        fields(requester = %requester.party_id(), requestee = %requestee.party_id())
    )]
    pub async fn request_friend_guarded(
        &self,
        requester: impl AsPartyId,
        requestee: impl AsPartyId,
        data: Option<Payload>,
    ) -> Result<FriendRequest, FriendshipError> {
        let (requester, requestee) = (requester.party_id(), requestee.party_id());
        if requester == requestee {
            return Err(FriendshipError::SelfRequest(requester));
        }

        let (local, remote) = tokio::join!(
            self.friendship_between(requester, requestee),
            self.friendship_between(requestee, requester),
        );
        let (local, remote) = (local?, remote?);
        let observed_local = local.as_ref().map(|r| r.status);
        let observed_remote = remote.as_ref().map(|r| r.status);

        let plan = plan_request(requester, requestee, local, remote, data, TimeStamp::new());

        let (friend, friender) = tokio::join!(
            self.apply_guarded(requestee, plan.remote, observed_remote),
            self.apply_guarded(requester, plan.local, observed_local),
        );

        Ok(FriendRequest {
            friend: friend?,
            friender: friender?,
        })
    }

    async fn apply_guarded(
        &self,
        party: PartyId,
        step: Step,
        observed: Option<Status>,
    ) -> Result<Friendship, FriendshipError> {
        let path = self.path.name();
        let counterpart = step.record().id;

        let landed = match (&step, observed) {
            (Step::Keep(_), _) => true,
            (Step::Create(record), _) => self.store.push_if_absent(party, path, record).await?,
            (Step::Update(record), Some(expected)) => {
                self.store
                    .compare_and_set_status(party, path, counterpart, expected, record.status)
                    .await?
            }
            (Step::Update(_), None) => false,
        };

        if !landed {
            tracing::debug!(%party, %counterpart, step = step.as_str(), "conditional write lost");
            return Err(FriendshipError::Conflict { party, counterpart });
        }
        Ok(step.into_record())
    }
}

/// Friendship operations bound to one party.
pub struct PartyFriends<'a, E, S> {
    service: &'a FriendshipService<E, S>,
    party: PartyId,
}

impl<E: Entity, S: DocumentStore<E>> PartyFriends<'_, E, S> {
    pub fn id(&self) -> PartyId {
        self.party
    }

    pub async fn request_friend(
        &self,
        friend: impl AsPartyId,
        data: Option<Payload>,
    ) -> Result<FriendRequest, FriendshipError> {
        self.service.request_friend(self.party, friend, data).await
    }

    pub async fn get_friends(
        &self,
        query: FriendsQuery,
    ) -> Result<Vec<JoinedFriendship<E>>, FriendshipError> {
        self.service.get_friends(self.party, query).await
    }

    pub async fn get_pending_friends(
        &self,
        query: FriendsQuery,
    ) -> Result<Vec<JoinedFriendship<E>>, FriendshipError> {
        self.service.get_pending_friends(self.party, query).await
    }

    pub async fn get_accepted_friends(
        &self,
        query: FriendsQuery,
    ) -> Result<Vec<JoinedFriendship<E>>, FriendshipError> {
        self.service.get_accepted_friends(self.party, query).await
    }

    pub async fn get_requested_friends(
        &self,
        query: FriendsQuery,
    ) -> Result<Vec<JoinedFriendship<E>>, FriendshipError> {
        self.service.get_requested_friends(self.party, query).await
    }

    pub async fn is_friends_with(&self, other: impl AsPartyId) -> bool {
        self.service.are_friends(self.party, other).await
    }

    pub async fn remove_friend(&self, friend: impl AsPartyId) -> Result<(), FriendshipError> {
        self.service.remove_friend(self.party, friend).await
    }
}
