//! Query shapes for the document store and the friends query translator
//!
//! The store speaks in terms of filters, projections and updates over an
//! embedded array addressed by name. Callers of the friends API speak in
//! terms of [`Conditions`] from their own point of view; [`Conditions::translate`]
//! turns those into a [`Filter`] over the counterpart documents.
use super::config::FriendsPath;
use super::friendship::{Friendship, TimeStamp};
use super::party::{Entity, FieldValue, PartyId};
use super::status::Status;
use std::cmp::Ordering;

/// Conditions that a single embedded friendship record must satisfy.
///
/// All set conditions are matched against the same element, never spread
/// over several elements of one array.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordMatch {
    pub id: Option<PartyId>,
    pub status: Option<Status>,
    pub added_before: Option<TimeStamp>,
    pub added_after: Option<TimeStamp>,
}

impl RecordMatch {
    pub fn counterpart(id: PartyId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
    pub fn matches(&self, record: &Friendship) -> bool {
        if self.id.is_some_and(|id| id != record.id) {
            return false;
        }
        if self.status.is_some_and(|status| status != record.status) {
            return false;
        }
        if let Some(before) = &self.added_before {
            if record.added >= *before {
                return false;
            }
        }
        if let Some(after) = &self.added_after {
            if record.added <= *after {
                return false;
            }
        }
        true
    }
}

/// A [`RecordMatch`] scoped to a named embedded array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElemMatch {
    pub path: String,
    pub record: RecordMatch,
}

impl ElemMatch {
    /// Whether any element of `records` satisfies every condition at once.
    pub fn matches_any(&self, records: &[Friendship]) -> bool {
        records.iter().any(|r| self.record.matches(r))
    }
}

/// Document selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub id: Option<PartyId>,
    pub fields: Vec<(String, FieldValue)>,
    pub elem_match: Option<ElemMatch>,
}

impl Filter {
    pub fn by_id(id: PartyId) -> Self {
        Self {
            id: Some(id),
            ..Self::default()
        }
    }
    pub fn with_elem_match(mut self, elem_match: ElemMatch) -> Self {
        self.elem_match = Some(elem_match);
        self
    }
    /// Checks the top-level part of the filter (id and entity fields).
    /// The embedded part is checked by the store against its own layout.
    pub fn matches_document<E: Entity>(&self, id: PartyId, entity: &E) -> bool {
        if self.id.is_some_and(|wanted| wanted != id) {
            return false;
        }
        self.fields
            .iter()
            .all(|(name, value)| entity.field(name).as_ref() == Some(value))
    }
}

/// Which embedded array to return, and optionally which of its elements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedProjection {
    pub path: String,
    pub elem_match: Option<RecordMatch>,
}

/// Which parts of a document a read returns. The id is always returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    pub entity: bool,
    pub embedded: Option<EmbeddedProjection>,
}

impl Default for Projection {
    fn default() -> Self {
        Self {
            entity: true,
            embedded: None,
        }
    }
}

/// Single-document write applied atomically by `find_one_and_update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Update {
    /// Append a new record to the embedded array.
    Push { path: String, record: Friendship },
    /// Set the status of the record describing `counterpart`.
    SetStatus {
        path: String,
        counterpart: PartyId,
        status: Status,
    },
}

/// Removes every element of an embedded array matching `record`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pull {
    pub path: String,
    pub record: RecordMatch,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKey {
    Id,
    Field(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub key: SortKey,
    pub order: Order,
}

impl Sort {
    pub fn ascending(key: SortKey) -> Self {
        Self {
            key,
            order: Order::Ascending,
        }
    }
    pub fn descending(key: SortKey) -> Self {
        Self {
            key,
            order: Order::Descending,
        }
    }
    fn compare<E: Entity>(&self, a: (PartyId, &E), b: (PartyId, &E)) -> Ordering {
        let ordering = match &self.key {
            SortKey::Id => a.0.cmp(&b.0),
            // documents missing the field sort first, as in most document stores
            SortKey::Field(name) => a.1.field(name).cmp(&b.1.field(name)),
        };
        match self.order {
            Order::Ascending => ordering,
            Order::Descending => ordering.reverse(),
        }
    }
}

/// Ordering and pagination of a collection scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub sort: Vec<Sort>,
    /// Page size. `Some(0)` means no limit, as in most document stores.
    pub limit: Option<usize>,
    pub skip: usize,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn sort_by(mut self, sort: Sort) -> Self {
        self.sort.push(sort);
        self
    }
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }
    /// Compares two documents by every sort key in turn.
    pub fn compare<E: Entity>(&self, a: (PartyId, &E), b: (PartyId, &E)) -> Ordering {
        self.sort
            .iter()
            .map(|s| s.compare(a, b))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    }
    /// Sorts, skips and limits already-filtered documents.
    pub fn apply<E: Entity>(&self, mut docs: Vec<(PartyId, E)>) -> Vec<(PartyId, E)> {
        if !self.sort.is_empty() {
            docs.sort_by(|a, b| self.compare((a.0, &a.1), (b.0, &b.1)));
        }
        let limit = self.limit.filter(|&n| n > 0).unwrap_or(usize::MAX);
        docs.into_iter().skip(self.skip).take(limit).collect()
    }
}

/// Which parts of each friend document a friends query returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Fields {
    #[default]
    All,
    IdOnly,
}

impl Fields {
    pub fn projection(&self) -> Projection {
        Projection {
            entity: matches!(self, Fields::All),
            embedded: None,
        }
    }
}

/// Caller conditions for a friends query, from the querying party's view.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    /// Restrict to one friend document.
    pub id: Option<PartyId>,
    /// Entity field equalities on the friend document.
    pub fields: Vec<(String, FieldValue)>,
    /// Conditions on the friendship record.
    pub friendship: RecordMatch,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn id(mut self, id: PartyId) -> Self {
        self.id = Some(id);
        self
    }
    pub fn field(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.fields.push((name.to_string(), value.into()));
        self
    }
    pub fn status(mut self, status: Status) -> Self {
        self.friendship.status = Some(status);
        self
    }
    pub fn added_before(mut self, at: TimeStamp) -> Self {
        self.friendship.added_before = Some(at);
        self
    }
    pub fn added_after(mut self, at: TimeStamp) -> Self {
        self.friendship.added_after = Some(at);
        self
    }
    /// Builds the filter over counterpart documents for `party`'s friends.
    ///
    /// The candidates are the documents holding a record that points back at
    /// `party`. Those records hold the counterpart's view, so a status
    /// condition is mirrored: `party`'s pending friends are the documents
    /// whose record of `party` is requested, and the reverse.
    pub fn translate(self, path: &FriendsPath, party: PartyId) -> Filter {
        let mut record = self.friendship;
        record.id = Some(party);
        record.status = record.status.map(|s| s.mirror());

        Filter {
            id: self.id,
            fields: self.fields,
            elem_match: Some(path.elem_match(record)),
        }
    }
}

/// A friends query: conditions, projection and pagination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FriendsQuery {
    pub conditions: Conditions,
    pub fields: Fields,
    pub options: FindOptions,
}

impl FriendsQuery {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn conditions(mut self, conditions: Conditions) -> Self {
        self.conditions = conditions;
        self
    }
    pub fn fields(mut self, fields: Fields) -> Self {
        self.fields = fields;
        self
    }
    pub fn options(mut self, options: FindOptions) -> Self {
        self.options = options;
        self
    }
    /// Presets the status condition, replacing any the caller set.
    pub fn with_status(mut self, status: Status) -> Self {
        self.conditions.friendship.status = Some(status);
        self
    }
}
