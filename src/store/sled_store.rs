//! Embedded document store over sled
//!
//! Party documents live in the `parties` tree keyed by the raw 16 id bytes
//! and encoded as CBOR. Declared `<path>.id` indexes share the
//! `embedded_index` tree, keyed by
//!
//! ```text
//! [path length: u8][path][counterpart id: 16][party id: 16]
//! ```
//!
//! Declarations live in the `embedded_indexes` tree, so every handle over
//! the same database sees them. Each document write is one transaction over
//! all three trees: it reads the declarations for the paths it touches and
//! rewrites those index entries, so a document and its index entries never
//! disagree. A declared index is only used for reads once its backfill has
//! finished.
//!
//! sled calls block, so every store operation runs on tokio's blocking
//! pool and must be awaited inside a tokio runtime.
use super::{ConditionalStore, DocumentStore};
use crate::error::StoreError;
use crate::friendship::Friendship;
use crate::party::{Entity, Party, PartyId};
use crate::query::{Filter, FindOptions, Projection, Pull, Update};
use crate::status::Status;
use async_trait::async_trait;
use sled::transaction::{
    ConflictableTransactionError, TransactionError, TransactionalTree,
    UnabortableTransactionError,
};
use sled::{Transactional, Tree};
use std::collections::{BTreeMap, BTreeSet};
use std::marker::PhantomData;
use std::sync::Arc;

const PARTIES_TREE: &str = "parties";
const INDEX_TREE: &str = "embedded_index";
const DECLARED_INDEXES_TREE: &str = "embedded_indexes";

// declaration states in the `embedded_indexes` tree
const INDEX_BUILDING: &[u8] = &[0];
const INDEX_READY: &[u8] = &[1];

// on-disk shape of a party document
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone)]
struct StoredParty<E> {
    #[n(0)]
    id: PartyId,
    #[n(1)]
    entity: E,
    #[n(2)]
    embedded: BTreeMap<String, Vec<Friendship>>,
}

impl<E> StoredParty<E> {
    fn records(&self, path: &str) -> &[Friendship] {
        self.embedded.get(path).map(Vec::as_slice).unwrap_or(&[])
    }
    fn counterparts(&self, path: &str) -> BTreeSet<PartyId> {
        self.records(path).iter().map(|r| r.id).collect()
    }
}

pub struct SledStore<E> {
    instance: Arc<sled::Db>,
    parties: Tree,
    index: Tree,
    declared: Tree,
    _entity: PhantomData<fn() -> E>,
}

// sled trees are reference counted handles
impl<E> Clone for SledStore<E> {
    fn clone(&self) -> Self {
        Self {
            instance: self.instance.clone(),
            parties: self.parties.clone(),
            index: self.index.clone(),
            declared: self.declared.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> SledStore<E> {
    pub fn new(instance: Arc<sled::Db>) -> Result<Self, StoreError> {
        let parties = instance.open_tree(PARTIES_TREE)?;
        let index = instance.open_tree(INDEX_TREE)?;
        let declared = instance.open_tree(DECLARED_INDEXES_TREE)?;

        Ok(Self {
            instance,
            parties,
            index,
            declared,
            _entity: PhantomData,
        })
    }

    /// Creates a new party document with an empty friends array.
    pub fn insert(&self, entity: E) -> Result<Party<E>, StoreError> {
        let stored = StoredParty {
            id: PartyId::new(),
            entity,
            embedded: BTreeMap::new(),
        };
        self.parties
            .insert(&stored.id.as_bytes()[..], minicbor::to_vec(&stored)?)?;

        Ok(Party {
            id: stored.id,
            entity: Some(stored.entity),
            friendships: vec![],
        })
    }

    /// Loads a party's entity without its embedded arrays.
    pub fn get(&self, id: PartyId) -> Result<Option<Party<E>>, StoreError> {
        Ok(self
            .load(id)?
            .map(|stored| project(stored, &Projection::default())))
    }

    /// Deletes a party document and its index entries.
    pub fn delete(&self, id: PartyId) -> Result<bool, StoreError> {
        let key = *id.as_bytes();

        let result: Result<bool, TransactionError<StoreError>> =
            (&self.parties, &self.index, &self.declared).transaction(
                |(parties, index, declared)| {
                    let Some(raw) = parties.remove(&key[..])? else {
                        return Ok(false);
                    };
                    let previous: StoredParty<E> = minicbor::decode(&raw)
                        .map_err(|e| ConflictableTransactionError::Abort(StoreError::from(e)))?;
                    reindex(index, declared, &previous, None)?;
                    Ok(true)
                },
            );

        result.map_err(abort_or_storage)
    }

    /// Whether `path` has a declared index whose backfill has completed.
    pub fn is_indexed(&self, path: &str) -> Result<bool, StoreError> {
        Ok(self
            .declared
            .get(path.as_bytes())?
            .is_some_and(|state| &*state == INDEX_READY))
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.instance.flush()?;
        Ok(())
    }

    /// Runs `op` on the blocking pool against a clone of this handle.
    async fn blocking<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&SledStore<E>) -> Result<T, StoreError> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || op(&store))
            .await
            .map_err(|e| StoreError::Backend(format!("sled task failed: {e}")))?
    }

    fn load(&self, id: PartyId) -> Result<Option<StoredParty<E>>, StoreError> {
        match self.parties.get(id.as_bytes())? {
            Some(raw) => Ok(Some(minicbor::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Documents that may match `filter`, narrowed by id or by a ready
    /// index when the filter allows it. Callers still check the filter.
    fn candidates(&self, filter: &Filter) -> Result<Vec<StoredParty<E>>, StoreError> {
        if let Some(id) = filter.id {
            return Ok(self.load(id)?.into_iter().collect());
        }

        if let Some(elem) = &filter.elem_match {
            if let Some(counterpart) = elem.record.id {
                if self.is_indexed(&elem.path)? {
                    let mut docs = Vec::new();
                    for entry in self.index.scan_prefix(index_prefix(&elem.path, counterpart)) {
                        let (key, _) = entry?;
                        let party = party_from_index_key(&key)?;
                        if let Some(doc) = self.load(party)? {
                            docs.push(doc);
                        }
                    }
                    return Ok(docs);
                }
            }
        }

        let mut docs = Vec::new();
        for entry in self.parties.iter() {
            let (_, raw) = entry?;
            docs.push(minicbor::decode(&raw)?);
        }
        Ok(docs)
    }

    /// Atomically rewrites one document. `change` returns `None` to leave
    /// the document untouched. Returns the previous document when `change`
    /// produced a new one.
    fn modify<F>(&self, id: PartyId, change: F) -> Result<Option<StoredParty<E>>, StoreError>
    where
        F: Fn(&StoredParty<E>) -> Option<StoredParty<E>>,
    {
        let key = *id.as_bytes();

        let result: Result<Option<StoredParty<E>>, TransactionError<StoreError>> =
            (&self.parties, &self.index, &self.declared).transaction(
                |(parties, index, declared)| {
                    let Some(raw) = parties.get(&key[..])? else {
                        return Ok(None);
                    };
                    let previous: StoredParty<E> = minicbor::decode(&raw)
                        .map_err(|e| ConflictableTransactionError::Abort(StoreError::from(e)))?;
                    let Some(next) = change(&previous) else {
                        return Ok(None);
                    };
                    let encoded = minicbor::to_vec(&next)
                        .map_err(|e| ConflictableTransactionError::Abort(StoreError::from(e)))?;

                    parties.insert(&key[..], encoded)?;
                    reindex(index, declared, &previous, Some(&next))?;
                    Ok(Some(previous))
                },
            );

        result.map_err(abort_or_storage)
    }

    fn declare_index(&self, name: &str) -> Result<(), StoreError> {
        let Some(path) = name.strip_suffix(".id") else {
            return Err(StoreError::Backend(format!(
                "unsupported index {name:?}, only <path>.id is indexable"
            )));
        };
        if path.is_empty() || path.len() > u8::MAX as usize {
            return Err(StoreError::Backend(format!(
                "index path {path:?} must be 1 to 255 bytes"
            )));
        }
        if self.is_indexed(path)? {
            return Ok(());
        }

        // writes maintain entries from here on, reads wait for READY
        let declared: Result<(), TransactionError<StoreError>> =
            self.declared.transaction(|declared| {
                if declared.get(path.as_bytes())?.is_none() {
                    declared.insert(path.as_bytes(), INDEX_BUILDING)?;
                }
                Ok(())
            });
        declared.map_err(abort_or_storage)?;

        // rewriting a document in place refreshes all of its index entries
        let mut documents = 0usize;
        for key in self.parties.iter().keys() {
            let key = key?;
            let id = party_from_index_key(&key)?;
            if self.modify(id, |current| Some(current.clone()))?.is_some() {
                documents += 1;
            }
        }

        self.declared.insert(path.as_bytes(), INDEX_READY)?;
        tracing::debug!(index = %name, documents, "declared embedded index");

        Ok(())
    }
}

fn abort_or_storage(error: TransactionError<StoreError>) -> StoreError {
    match error {
        TransactionError::Abort(e) => e,
        TransactionError::Storage(e) => StoreError::Sled(e),
    }
}

fn index_prefix(path: &str, counterpart: PartyId) -> Vec<u8> {
    // path length is capped at declaration time
    let mut key = Vec::with_capacity(1 + path.len() + 32);
    key.push(path.len() as u8);
    key.extend_from_slice(path.as_bytes());
    key.extend_from_slice(counterpart.as_bytes());
    key
}

fn index_key(path: &str, counterpart: PartyId, party: PartyId) -> Vec<u8> {
    let mut key = index_prefix(path, counterpart);
    key.extend_from_slice(party.as_bytes());
    key
}

// the trailing 16 bytes of an index key, or a whole document key
fn party_from_index_key(key: &[u8]) -> Result<PartyId, StoreError> {
    let tail = key
        .len()
        .checked_sub(16)
        .map(|start| &key[start..])
        .ok_or_else(|| StoreError::Backend("truncated party key".into()))?;
    let bytes: [u8; 16] = tail
        .try_into()
        .map_err(|_| StoreError::Backend("truncated party key".into()))?;

    Ok(PartyId::from_bytes(bytes))
}

/// Brings the index entries of every declared path the document touches in
/// line with `next`. `None` means the document is being deleted.
///
/// All current entries are written, not only the new ones, so a document
/// written before its path was declared is fully indexed by its next write.
fn reindex<E>(
    index: &TransactionalTree,
    declared: &TransactionalTree,
    previous: &StoredParty<E>,
    next: Option<&StoredParty<E>>,
) -> Result<(), UnabortableTransactionError> {
    let paths: BTreeSet<&String> = previous
        .embedded
        .keys()
        .chain(next.into_iter().flat_map(|n| n.embedded.keys()))
        .collect();

    for path in paths {
        if declared.get(path.as_bytes())?.is_none() {
            continue;
        }
        let before = previous.counterparts(path);
        let after = next.map(|n| n.counterparts(path)).unwrap_or_default();

        for gone in before.difference(&after) {
            index.remove(index_key(path, *gone, previous.id))?;
        }
        for counterpart in &after {
            index.insert(index_key(path, *counterpart, previous.id), Vec::<u8>::new())?;
        }
    }
    Ok(())
}

fn matches<E: Entity>(doc: &StoredParty<E>, filter: &Filter) -> bool {
    filter.matches_document(doc.id, &doc.entity)
        && filter
            .elem_match
            .as_ref()
            .is_none_or(|elem| elem.matches_any(doc.records(&elem.path)))
}

fn project<E>(stored: StoredParty<E>, projection: &Projection) -> Party<E> {
    let StoredParty {
        id,
        entity,
        mut embedded,
    } = stored;

    let friendships = match &projection.embedded {
        None => vec![],
        Some(embedded_projection) => {
            let records = embedded
                .remove(&embedded_projection.path)
                .unwrap_or_default();
            match &embedded_projection.elem_match {
                None => records,
                // only the first matching element, like a positional projection
                Some(record) => records
                    .into_iter()
                    .find(|r| record.matches(r))
                    .into_iter()
                    .collect(),
            }
        }
    };

    Party {
        id,
        entity: projection.entity.then_some(entity),
        friendships,
    }
}

fn apply<E: Clone>(doc: &StoredParty<E>, update: &Update) -> StoredParty<E> {
    let mut next = doc.clone();
    match update {
        Update::Push { path, record } => {
            next.embedded
                .entry(path.clone())
                .or_default()
                .push(record.clone());
        }
        Update::SetStatus {
            path,
            counterpart,
            status,
        } => {
            if let Some(record) = next
                .embedded
                .get_mut(path)
                .and_then(|records| records.iter_mut().find(|r| r.id == *counterpart))
            {
                record.status = *status;
            }
        }
    }
    next
}

#[async_trait]
impl<E: Entity> DocumentStore<E> for SledStore<E> {
    async fn find_one(
        &self,
        filter: &Filter,
        projection: &Projection,
    ) -> Result<Option<Party<E>>, StoreError> {
        let (filter, projection) = (filter.clone(), projection.clone());

        self.blocking(move |store| {
            Ok(store
                .candidates(&filter)?
                .into_iter()
                .find(|doc| matches(doc, &filter))
                .map(|doc| project(doc, &projection)))
        })
        .await
    }

    async fn find_one_and_update(
        &self,
        filter: &Filter,
        update: &Update,
    ) -> Result<Option<Party<E>>, StoreError> {
        let (filter, update) = (filter.clone(), update.clone());

        self.blocking(move |store| {
            for doc in store.candidates(&filter)? {
                if !matches(&doc, &filter) {
                    continue;
                }
                // the filter is checked again inside the transaction
                let previous = store.modify(doc.id, |current| {
                    matches(current, &filter).then(|| apply(current, &update))
                })?;
                if let Some(previous) = previous {
                    return Ok(Some(project(previous, &Projection::default())));
                }
            }
            Ok(None)
        })
        .await
    }

    async fn find(
        &self,
        filter: &Filter,
        projection: &Projection,
        options: &FindOptions,
    ) -> Result<Vec<Party<E>>, StoreError> {
        let (filter, projection, options) = (filter.clone(), projection.clone(), options.clone());

        self.blocking(move |store| {
            let mut embedded_by_id = BTreeMap::new();
            let mut matched = Vec::new();
            for doc in store.candidates(&filter)? {
                if matches(&doc, &filter) {
                    embedded_by_id.insert(doc.id, doc.embedded);
                    matched.push((doc.id, doc.entity));
                }
            }

            Ok(options
                .apply(matched)
                .into_iter()
                .map(|(id, entity)| {
                    let embedded = embedded_by_id.remove(&id).unwrap_or_default();
                    project(
                        StoredParty {
                            id,
                            entity,
                            embedded,
                        },
                        &projection,
                    )
                })
                .collect())
        })
        .await
    }

    async fn update_many_pull(&self, filter: &Filter, pull: &Pull) -> Result<u64, StoreError> {
        let (filter, pull) = (filter.clone(), pull.clone());

        self.blocking(move |store| {
            let mut modified = 0;
            for doc in store.candidates(&filter)? {
                if !matches(&doc, &filter) {
                    continue;
                }
                let previous = store.modify(doc.id, |current| {
                    if !matches(current, &filter) {
                        return None;
                    }
                    let holds_match = current
                        .records(&pull.path)
                        .iter()
                        .any(|r| pull.record.matches(r));
                    if !holds_match {
                        return None;
                    }
                    let mut next = current.clone();
                    if let Some(records) = next.embedded.get_mut(&pull.path) {
                        records.retain(|r| !pull.record.matches(r));
                    }
                    Some(next)
                })?;
                if previous.is_some() {
                    modified += 1;
                }
            }
            Ok(modified)
        })
        .await
    }

    async fn ensure_index(&self, name: &str) -> Result<(), StoreError> {
        let name = name.to_string();
        self.blocking(move |store| store.declare_index(&name)).await
    }
}

#[async_trait]
impl<E: Entity> ConditionalStore<E> for SledStore<E> {
    async fn push_if_absent(
        &self,
        party: PartyId,
        path: &str,
        record: &Friendship,
    ) -> Result<bool, StoreError> {
        let (path, record) = (path.to_string(), record.clone());

        self.blocking(move |store| {
            let previous = store.modify(party, |current| {
                if current.records(&path).iter().any(|r| r.id == record.id) {
                    return None;
                }
                let mut next = current.clone();
                next.embedded
                    .entry(path.clone())
                    .or_default()
                    .push(record.clone());
                Some(next)
            })?;

            Ok(previous.is_some())
        })
        .await
    }

    async fn compare_and_set_status(
        &self,
        party: PartyId,
        path: &str,
        counterpart: PartyId,
        expected: Status,
        status: Status,
    ) -> Result<bool, StoreError> {
        let path = path.to_string();

        self.blocking(move |store| {
            let previous = store.modify(party, |current| {
                let holds_expected = current
                    .records(&path)
                    .iter()
                    .any(|r| r.id == counterpart && r.status == expected);
                holds_expected.then(|| {
                    apply(
                        current,
                        &Update::SetStatus {
                            path: path.clone(),
                            counterpart,
                            status,
                        },
                    )
                })
            })?;

            Ok(previous.is_some())
        })
        .await
    }
}
