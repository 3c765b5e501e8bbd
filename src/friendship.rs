//! The embedded friendship record and its field types
use super::error::FriendshipError;
use super::party::PartyId;
use super::status::Status;
use chrono::{DateTime, SubsecRound, TimeZone, Utc};

/// One side of a friendship, embedded in the party that owns it.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Friendship {
    #[n(0)]
    pub id: PartyId, // the counterpart this record describes
    #[n(1)]
    pub status: Status,
    #[n(2)]
    pub added: TimeStamp,
    #[n(3)]
    pub data: Option<Payload>,
}

impl Friendship {
    pub fn new(
        counterpart: PartyId,
        status: Status,
        added: TimeStamp,
        data: Option<Payload>,
    ) -> Self {
        Self {
            id: counterpart,
            status,
            added,
            data,
        }
    }
    /// Same record with only the status replaced.
    pub fn with_status(&self, status: Status) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }
}

/// When a friendship record was created, at microsecond precision.
///
/// Stored as signed microseconds since the Unix epoch, so every value
/// read back compares equal to the one written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeStamp(DateTime<Utc>);

impl TimeStamp {
    pub fn new() -> Self {
        Self(Utc::now().trunc_subsecs(6))
    }
    pub fn from_ymd_hms(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .single()
            .map(Self)
    }
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
    pub fn micros(&self) -> i64 {
        self.0.timestamp_micros()
    }
}

impl Default for TimeStamp {
    fn default() -> Self {
        Self::new()
    }
}

impl From<DateTime<Utc>> for TimeStamp {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value.trunc_subsecs(6))
    }
}

impl<C> minicbor::Encode<C> for TimeStamp {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        e.i64(self.micros())?.ok()
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let micros = d.i64()?;
        DateTime::from_timestamp_micros(micros)
            .map(Self)
            .ok_or_else(|| minicbor::decode::Error::message("timestamp out of range"))
    }
}

/// Caller metadata attached to a friendship when it is first requested.
///
/// The engine never looks inside; it is carried as CBOR bytes.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct Payload(#[n(0)] #[cbor(with = "minicbor::bytes")] Vec<u8>);

impl Payload {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
    pub fn encode<T: minicbor::Encode<()>>(value: &T) -> Result<Self, FriendshipError> {
        minicbor::to_vec(value)
            .map(Self)
            .map_err(|e| FriendshipError::Payload(e.to_string()))
    }
    pub fn decode<'a, T: minicbor::Decode<'a, ()>>(&'a self) -> Result<T, FriendshipError> {
        minicbor::decode(&self.0).map_err(|e| FriendshipError::Payload(e.to_string()))
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}
