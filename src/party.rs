//! Parties: the documents that embed friendship records
use super::friendship::Friendship;
use super::utils;
use std::fmt;
use uuid7::{Uuid, uuid7};

/// Opaque party identifier. A uuid7 so ids sort by creation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartyId([u8; 16]);

impl PartyId {
    pub fn new() -> Self {
        Self(*uuid7().as_bytes())
    }
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
    pub fn to_uuid(&self) -> Uuid {
        Uuid::from(self.0)
    }
}

impl Default for PartyId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match utils::party_id_to_bech32(self) {
            Ok(encoded) => f.write_str(&encoded),
            Err(_) => write!(f, "{}", self.to_uuid()),
        }
    }
}

impl<C> minicbor::Encode<C> for PartyId {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.bytes(&self.0)?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for PartyId {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let bytes = d.bytes()?;
        let digest: [u8; 16] = bytes
            .try_into()
            .map_err(|_| minicbor::decode::Error::message("party id must be 16 bytes"))?;

        Ok(PartyId(digest))
    }
}

/// A scalar value of a named top-level entity field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Int(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

/// The host application's own document body.
///
/// Anything that can be stored as CBOR and can answer field lookups by name
/// can become a party. Field lookups drive top-level query conditions and
/// sorting.
pub trait Entity:
    Clone + Send + Sync + 'static + minicbor::Encode<()> + for<'b> minicbor::Decode<'b, ()>
{
    fn field(&self, name: &str) -> Option<FieldValue>;
}

/// An entity augmented with its identity and embedded friendships.
///
/// `entity` is `None` when a projection excluded it. `friendships` is only
/// populated when a projection asked for the embedded array, and then holds
/// either the whole array or just the elements matched by the projection.
#[derive(Debug, Clone, PartialEq)]
pub struct Party<E> {
    pub id: PartyId,
    pub entity: Option<E>,
    pub friendships: Vec<Friendship>,
}

impl<E> Party<E> {
    pub fn friendship_with(&self, counterpart: PartyId) -> Option<&Friendship> {
        self.friendships.iter().find(|f| f.id == counterpart)
    }
}

/// Anything that names a party: a bare id or a full party document.
pub trait AsPartyId {
    fn party_id(&self) -> PartyId;
}

impl AsPartyId for PartyId {
    fn party_id(&self) -> PartyId {
        *self
    }
}

impl<E> AsPartyId for Party<E> {
    fn party_id(&self) -> PartyId {
        self.id
    }
}

impl<T: AsPartyId + ?Sized> AsPartyId for &T {
    fn party_id(&self) -> PartyId {
        (**self).party_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn party_id_encoding() {
        let original = PartyId::new();

        let encoding = minicbor::to_vec(original).unwrap();
        let decode: PartyId = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
    }

    #[test]
    fn party_ids_are_time_ordered() {
        let first = PartyId::new();
        let second = PartyId::new();

        assert!(first < second);
    }

    #[test]
    fn normalizes_party_and_bare_id() {
        let id = PartyId::new();
        let party: Party<()> = Party {
            id,
            entity: None,
            friendships: vec![],
        };

        assert_eq!((&party).party_id(), id);
        assert_eq!(id.party_id(), id);
        assert_eq!((&&id).party_id(), id);
    }
}
