//! Property-based tests for the friend request planner
//!
//! Random sequences of requests and removals between three parties are
//! played against an in-memory model of the embedded arrays, applying each
//! plan the way the service does. Whatever the order, every pair must end
//! in a resting state both sides agree on.
//!
//! The last property replays the same kind of sequence through the sled
//! store and checks that it lands in the same place as the model.

mod common;

use embedded_friends::{
    Friendship, PartyId, Status, TimeStamp,
    status::{Step, is_consistent_pair, plan_request},
};
use proptest::prelude::*;

const PARTIES: usize = 3;

#[derive(Debug, Clone, Copy)]
enum Op {
    Request(usize, usize),
    Remove(usize, usize),
}

/// Strategy for an operation between two distinct parties
fn op_strategy() -> impl Strategy<Value = Op> {
    (0..PARTIES, 1..PARTIES, any::<bool>()).prop_map(|(a, offset, request)| {
        let b = (a + offset) % PARTIES;
        if request {
            Op::Request(a, b)
        } else {
            Op::Remove(a, b)
        }
    })
}

/// Each party's embedded array, in insertion order
struct Model {
    ids: Vec<PartyId>,
    records: Vec<Vec<Friendship>>,
}

impl Model {
    fn new() -> Self {
        Self {
            ids: (0..PARTIES).map(|_| PartyId::new()).collect(),
            records: vec![vec![]; PARTIES],
        }
    }

    fn record(&self, owner: usize, counterpart: usize) -> Option<Friendship> {
        let id = self.ids[counterpart];
        self.records[owner].iter().find(|r| r.id == id).cloned()
    }

    fn status(&self, owner: usize, counterpart: usize) -> Option<Status> {
        self.record(owner, counterpart).map(|r| r.status)
    }

    fn apply(&mut self, owner: usize, step: Step) {
        match step {
            Step::Keep(_) => {}
            Step::Update(record) => {
                if let Some(existing) = self.records[owner].iter_mut().find(|r| r.id == record.id) {
                    existing.status = record.status;
                }
            }
            Step::Create(record) => self.records[owner].push(record),
        }
    }

    fn request(&mut self, a: usize, b: usize) -> (Step, Step) {
        let plan = plan_request(
            self.ids[a],
            self.ids[b],
            self.record(a, b),
            self.record(b, a),
            None,
            TimeStamp::new(),
        );
        let steps = (plan.local.clone(), plan.remote.clone());
        self.apply(b, plan.remote);
        self.apply(a, plan.local);
        steps
    }

    fn remove(&mut self, a: usize, b: usize) {
        let (id_a, id_b) = (self.ids[a], self.ids[b]);
        self.records[a].retain(|r| r.id != id_b);
        self.records[b].retain(|r| r.id != id_a);
    }

    fn run(&mut self, op: Op) {
        match op {
            Op::Request(a, b) => {
                self.request(a, b);
            }
            Op::Remove(a, b) => self.remove(a, b),
        }
    }

    fn pairs() -> impl Iterator<Item = (usize, usize)> {
        (0..PARTIES).flat_map(|a| (a + 1..PARTIES).map(move |b| (a, b)))
    }
}

proptest! {
    /// Every pair rests in (none, none), (Requested, Pending) or (Accepted, Accepted)
    #[test]
    fn pairs_stay_consistent(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let mut model = Model::new();

        for op in ops {
            model.run(op);
            for (a, b) in Model::pairs() {
                prop_assert!(
                    is_consistent_pair(model.status(a, b), model.status(b, a)),
                    "pair ({}, {}) inconsistent after {:?}: {:?} / {:?}",
                    a, b, op, model.status(a, b), model.status(b, a)
                );
            }
        }
    }

    /// No party ever holds two records for the same counterpart
    #[test]
    fn no_duplicate_records(ops in prop::collection::vec(op_strategy(), 0..40)) {
        let mut model = Model::new();

        for op in ops {
            model.run(op);
        }

        for records in &model.records {
            let mut ids: Vec<PartyId> = records.iter().map(|r| r.id).collect();
            let total = ids.len();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), total);
        }
    }

    /// Repeating a request straight away writes nothing
    #[test]
    fn repeated_request_is_a_no_op(
        ops in prop::collection::vec(op_strategy(), 0..20),
        a in 0..PARTIES,
        offset in 1..PARTIES,
    ) {
        let b = (a + offset) % PARTIES;
        let mut model = Model::new();
        for op in ops {
            model.run(op);
        }

        model.request(a, b);
        let (local, remote) = model.request(a, b);

        prop_assert!(!local.writes(), "local step {:?}", local);
        prop_assert!(!remote.writes(), "remote step {:?}", remote);
    }

    /// A request in each direction always ends accepted, from any history
    #[test]
    fn mutual_requests_accept(
        ops in prop::collection::vec(op_strategy(), 0..20),
        a in 0..PARTIES,
        offset in 1..PARTIES,
    ) {
        let b = (a + offset) % PARTIES;
        let mut model = Model::new();
        for op in ops {
            model.run(op);
        }

        model.request(a, b);
        model.request(b, a);

        prop_assert_eq!(model.status(a, b), Some(Status::Accepted));
        prop_assert_eq!(model.status(b, a), Some(Status::Accepted));
    }

    /// The requester's status is decided by the requestee's record alone
    #[test]
    fn local_status_follows_remote(
        local in prop::option::of(prop::sample::select(Status::ALL.to_vec())),
        remote in prop::option::of(prop::sample::select(Status::ALL.to_vec())),
    ) {
        let (a, b) = (PartyId::new(), PartyId::new());
        let record = |id, status| Friendship::new(id, status, TimeStamp::new(), None);

        let plan = plan_request(
            a,
            b,
            local.map(|s| record(b, s)),
            remote.map(|s| record(a, s)),
            None,
            TimeStamp::new(),
        );

        let expected = match remote {
            None | Some(Status::Pending) => Status::Requested,
            Some(Status::Accepted) | Some(Status::Requested) => Status::Accepted,
        };
        prop_assert_eq!(plan.local.record().status, expected);
        prop_assert_eq!(plan.remote.record().status, expected.mirror());
        prop_assert_eq!(plan.local.record().id, b);
        prop_assert_eq!(plan.remote.record().id, a);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// The sled-backed service ends where the model does
    #[test]
    fn store_matches_model(ops in prop::collection::vec(op_strategy(), 1..12)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        let mismatches = runtime
            .block_on(async {
                let fx = common::fixture().await?;
                let mut model = Model::new();
                let mut users = Vec::with_capacity(PARTIES);
                for i in 0..PARTIES {
                    users.push(fx.user(&format!("user_{i}"))?);
                }
                model.ids = users.iter().map(|u| u.id).collect();

                for op in &ops {
                    match *op {
                        Op::Request(a, b) => {
                            fx.friends.request_friend(&users[a], &users[b], None).await?;
                        }
                        Op::Remove(a, b) => fx.friends.remove_friend(&users[a], &users[b]).await?,
                    }
                    model.run(*op);
                }

                let mut mismatches = vec![];
                for a in 0..PARTIES {
                    for b in 0..PARTIES {
                        if a == b {
                            continue;
                        }
                        let stored = fx.record_of(&users[a], &users[b]).await?.map(|r| r.status);
                        if stored != model.status(a, b) {
                            mismatches.push((a, b, stored, model.status(a, b)));
                        }
                    }
                }
                anyhow::Ok(mismatches)
            })
            .unwrap();

        prop_assert!(mismatches.is_empty(), "store and model disagree: {:?}", mismatches);
    }
}
