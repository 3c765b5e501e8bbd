//! Friendship status lattice and the request planner
//!
//! A pair of parties moves through at most three states per side:
//! no record, then `Requested`/`Pending`, then `Accepted` on both. The
//! planner here is pure: given what both sides hold right now it decides
//! which writes a request needs, so the service only has to execute them.
use super::friendship::{Friendship, Payload, TimeStamp};
use super::party::PartyId;
use std::fmt;
use std::str::FromStr;

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// I was asked and haven't reciprocated.
    #[n(0)]
    Pending,
    /// Mutual.
    #[n(1)]
    Accepted,
    /// I asked and am awaiting reciprocation.
    #[n(2)]
    Requested,
}

impl Status {
    pub const ALL: [Status; 3] = [Status::Pending, Status::Accepted, Status::Requested];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Accepted => "accepted",
            Status::Requested => "requested",
        }
    }
    /// The status the counterpart holds for the same pair at rest.
    pub fn mirror(&self) -> Status {
        match self {
            Status::Pending => Status::Requested,
            Status::Requested => Status::Pending,
            Status::Accepted => Status::Accepted,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("unknown friendship status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for Status {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "accepted" => Ok(Status::Accepted),
            "requested" => Ok(Status::Requested),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Whether the statuses two parties hold for each other form a valid
/// resting state. `None` means that side has no record.
pub fn is_consistent_pair(a: Option<Status>, b: Option<Status>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.mirror() == b,
        _ => false,
    }
}

/// What one side of a request does with its record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Already in the target state, no write.
    Keep(Friendship),
    /// Existing record whose status changes in place.
    Update(Friendship),
    /// No record yet, push a new one.
    Create(Friendship),
}

impl Step {
    pub fn record(&self) -> &Friendship {
        match self {
            Step::Keep(r) | Step::Update(r) | Step::Create(r) => r,
        }
    }
    pub fn into_record(self) -> Friendship {
        match self {
            Step::Keep(r) | Step::Update(r) | Step::Create(r) => r,
        }
    }
    pub fn writes(&self) -> bool {
        !matches!(self, Step::Keep(_))
    }
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Keep(_) => "keep",
            Step::Update(_) => "update",
            Step::Create(_) => "create",
        }
    }
}

/// The writes a single friend request needs, at most one per side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPlan {
    /// The requester's record of the requestee.
    pub local: Step,
    /// The requestee's record of the requester.
    pub remote: Step,
}

/// Plan a request from `requester` to `requestee`.
///
/// `local` is the requester's record of the requestee and `remote` the
/// requestee's record of the requester, as read just before planning.
/// The new local status is keyed off the remote status only:
///
/// | remote      | local becomes | remote write          |
/// |-------------|---------------|-----------------------|
/// | none        | Requested     | create Pending        |
/// | Pending     | Requested     | none                  |
/// | Accepted    | Accepted      | none                  |
/// | Requested   | Accepted      | update to Accepted    |
pub fn plan_request(
    requester: PartyId,
    requestee: PartyId,
    local: Option<Friendship>,
    remote: Option<Friendship>,
    data: Option<Payload>,
    now: TimeStamp,
) -> RequestPlan {
    let (status, remote) = match remote {
        None => (
            Status::Requested,
            Step::Create(Friendship::new(
                requester,
                Status::Pending,
                now,
                data.clone(),
            )),
        ),
        Some(remote) => match remote.status {
            Status::Pending => (Status::Requested, Step::Keep(remote)),
            Status::Accepted => (Status::Accepted, Step::Keep(remote)),
            Status::Requested => (
                Status::Accepted,
                Step::Update(remote.with_status(Status::Accepted)),
            ),
        },
    };

    let local = match local {
        Some(local) if local.status == status => Step::Keep(local),
        Some(local) => Step::Update(local.with_status(status)),
        None => Step::Create(Friendship::new(requestee, status, now, data)),
    };

    RequestPlan { local, remote }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: PartyId, status: Status) -> Friendship {
        Friendship::new(id, status, TimeStamp::new(), None)
    }

    #[test]
    fn first_request_creates_both_sides() {
        let (a, b) = (PartyId::new(), PartyId::new());
        let data = Payload::from_bytes(vec![7]);

        let plan = plan_request(a, b, None, None, Some(data.clone()), TimeStamp::new());

        match (&plan.local, &plan.remote) {
            (Step::Create(local), Step::Create(remote)) => {
                assert_eq!(local.id, b);
                assert_eq!(local.status, Status::Requested);
                assert_eq!(local.data, Some(data.clone()));
                assert_eq!(remote.id, a);
                assert_eq!(remote.status, Status::Pending);
                assert_eq!(remote.data, Some(data));
            }
            other => panic!("unexpected plan {:?}", other),
        }
    }

    #[test]
    fn repeated_request_writes_nothing() {
        let (a, b) = (PartyId::new(), PartyId::new());
        let local = record(b, Status::Requested);
        let remote = record(a, Status::Pending);

        let plan = plan_request(
            a,
            b,
            Some(local.clone()),
            Some(remote.clone()),
            None,
            TimeStamp::new(),
        );

        assert_eq!(plan.local, Step::Keep(local));
        assert_eq!(plan.remote, Step::Keep(remote));
    }

    #[test]
    fn reciprocation_accepts_both_sides() {
        let (a, b) = (PartyId::new(), PartyId::new());
        let data = Payload::from_bytes(vec![9]);
        let mut local = record(b, Status::Pending);
        local.data = Some(data.clone());
        let remote = record(a, Status::Requested);

        let plan = plan_request(a, b, Some(local), Some(remote), None, TimeStamp::new());

        assert!(matches!(plan.remote, Step::Update(ref r) if r.status == Status::Accepted));
        match plan.local {
            Step::Update(r) => {
                assert_eq!(r.status, Status::Accepted);
                assert_eq!(r.data, Some(data));
            }
            other => panic!("unexpected local step {:?}", other),
        }
    }

    #[test]
    fn missing_local_against_requested_remote_creates_accepted() {
        let (a, b) = (PartyId::new(), PartyId::new());

        let plan = plan_request(
            a,
            b,
            None,
            Some(record(a, Status::Requested)),
            None,
            TimeStamp::new(),
        );

        assert!(matches!(plan.local, Step::Create(ref r) if r.status == Status::Accepted));
        assert!(plan.remote.writes());
    }

    #[test]
    fn mirror_is_an_involution() {
        for status in Status::ALL {
            assert_eq!(status.mirror().mirror(), status);
        }
        assert_eq!(Status::Accepted.mirror(), Status::Accepted);
    }

    #[test]
    fn status_parses_from_its_name() {
        for status in Status::ALL {
            assert_eq!(status.as_str().parse::<Status>(), Ok(status));
        }
        assert!("friends".parse::<Status>().is_err());
    }

    #[test]
    fn consistency_of_pairs() {
        assert!(is_consistent_pair(None, None));
        assert!(is_consistent_pair(Some(Status::Requested), Some(Status::Pending)));
        assert!(is_consistent_pair(Some(Status::Accepted), Some(Status::Accepted)));
        assert!(!is_consistent_pair(Some(Status::Requested), None));
        assert!(!is_consistent_pair(Some(Status::Requested), Some(Status::Requested)));
        assert!(!is_consistent_pair(Some(Status::Accepted), Some(Status::Pending)));
    }
}
