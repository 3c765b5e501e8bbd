//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use embedded_friends::{
    DocumentStore, Entity, FieldValue, FriendsConfig, Friendship, FriendshipService, Party,
    SledStore, query::Filter,
};
use std::sync::Arc;
use tempfile::{TempDir, tempdir};

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq)]
pub struct User {
    #[n(0)]
    pub name: String,
}

impl Entity for User {
    fn field(&self, name: &str) -> Option<FieldValue> {
        match name {
            "name" => Some(FieldValue::Text(self.name.clone())),
            _ => None,
        }
    }
}

pub type Users = FriendshipService<User, SledStore<User>>;

pub struct Fixture {
    // keeps the sled directory alive for the duration of the test
    _dir: TempDir,
    pub store: Arc<SledStore<User>>,
    pub friends: Users,
}

impl Fixture {
    pub fn user(&self, name: &str) -> anyhow::Result<Party<User>> {
        Ok(self.store.insert(User { name: name.into() })?)
    }

    /// `party`'s stored records, read straight from the store.
    pub async fn records(&self, party: &Party<User>) -> anyhow::Result<Vec<Friendship>> {
        let doc = self
            .store
            .find_one(
                &Filter::by_id(party.id),
                &self.friends.path().records_projection(),
            )
            .await?;
        Ok(doc.map(|d| d.friendships).unwrap_or_default())
    }

    pub async fn record_of(
        &self,
        party: &Party<User>,
        counterpart: &Party<User>,
    ) -> anyhow::Result<Option<Friendship>> {
        Ok(self
            .records(party)
            .await?
            .into_iter()
            .find(|f| f.id == counterpart.id))
    }
}

// Sled locks its directory, so every test gets its own database under a
// temp dir that is removed when the fixture drops.
pub async fn fixture() -> anyhow::Result<Fixture> {
    fixture_with(FriendsConfig::default()).await
}

pub async fn fixture_with(config: FriendsConfig) -> anyhow::Result<Fixture> {
    init_test_logging();

    let dir = tempdir()?;
    let db = sled::open(dir.path().join("friends.db"))?;
    let store = Arc::new(SledStore::new(Arc::new(db))?);
    let friends = FriendshipService::attach(store.clone(), config).await?;

    Ok(Fixture {
        _dir: dir,
        store,
        friends,
    })
}

pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("embedded_friends=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
