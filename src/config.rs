//! Construction-time configuration and the embedded-path accessor layer
use super::error::FriendshipError;
use super::friendship::Friendship;
use super::party::PartyId;
use super::query::{
    ElemMatch, EmbeddedProjection, Filter, Projection, Pull, RecordMatch, Update,
};
use super::status::Status;

pub const DEFAULT_PATH_NAME: &str = "friends";
pub const PATH_NAME_ENV: &str = "FRIENDS_PATH_NAME";
pub const DO_INDEX_ENV: &str = "FRIENDS_DO_INDEX";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendsConfig {
    /// Name of the embedded array holding friendship records.
    pub path_name: String,
    /// Whether to declare an index on `<path_name>.id`.
    pub do_index: bool,
}

impl Default for FriendsConfig {
    fn default() -> Self {
        Self {
            path_name: DEFAULT_PATH_NAME.to_string(),
            do_index: true,
        }
    }
}

impl FriendsConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn set_path_name(mut self, path_name: &str) -> Self {
        self.path_name = path_name.to_string();
        self
    }
    pub fn set_do_index(mut self, do_index: bool) -> Self {
        self.do_index = do_index;
        self
    }

    /// Defaults overridden by `FRIENDS_PATH_NAME` and `FRIENDS_DO_INDEX`.
    pub fn from_env() -> Result<Self, FriendshipError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, FriendshipError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path_name) = lookup(PATH_NAME_ENV) {
            config.path_name = path_name.trim().to_string();
        }
        if let Some(raw) = lookup(DO_INDEX_ENV) {
            config.do_index = match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" => false,
                other => {
                    return Err(FriendshipError::InvalidConfig(format!(
                        "{DO_INDEX_ENV} must be a boolean, got {other:?}"
                    )));
                }
            };
        }

        config.validate()?;
        Ok(config)
    }

    /// Checks the path name can address an embedded array and returns the
    /// accessor bound to it.
    pub fn validate(&self) -> Result<FriendsPath, FriendshipError> {
        let name = self.path_name.as_str();
        if name.is_empty() {
            return Err(FriendshipError::InvalidConfig(
                "path name must not be empty".into(),
            ));
        }
        if name.contains('.') || name.starts_with('$') {
            return Err(FriendshipError::InvalidConfig(format!(
                "path name {name:?} must not contain '.' or start with '$'"
            )));
        }

        Ok(FriendsPath {
            name: name.to_string(),
        })
    }
}

/// All reads and writes of the embedded friends array go through here, so
/// the configured path name is applied in one place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FriendsPath {
    name: String,
}

impl FriendsPath {
    pub fn name(&self) -> &str {
        &self.name
    }
    /// Name of the index over counterpart ids.
    pub fn index_name(&self) -> String {
        format!("{}.id", self.name)
    }
    pub fn elem_match(&self, record: RecordMatch) -> ElemMatch {
        ElemMatch {
            path: self.name.clone(),
            record,
        }
    }
    /// Selects `party`'s document only if it holds a record of `counterpart`.
    pub fn record_filter(&self, party: PartyId, counterpart: PartyId) -> Filter {
        Filter::by_id(party).with_elem_match(self.elem_match(RecordMatch::counterpart(counterpart)))
    }
    /// Returns just the record of `counterpart` from the embedded array.
    pub fn record_projection(&self, counterpart: PartyId) -> Projection {
        Projection {
            entity: false,
            embedded: Some(EmbeddedProjection {
                path: self.name.clone(),
                elem_match: Some(RecordMatch::counterpart(counterpart)),
            }),
        }
    }
    /// Returns the whole embedded array and nothing else.
    pub fn records_projection(&self) -> Projection {
        Projection {
            entity: false,
            embedded: Some(EmbeddedProjection {
                path: self.name.clone(),
                elem_match: None,
            }),
        }
    }
    pub fn push(&self, record: Friendship) -> Update {
        Update::Push {
            path: self.name.clone(),
            record,
        }
    }
    pub fn set_status(&self, counterpart: PartyId, status: Status) -> Update {
        Update::SetStatus {
            path: self.name.clone(),
            counterpart,
            status,
        }
    }
    pub fn pull(&self, counterpart: PartyId) -> Pull {
        Pull {
            path: self.name.clone(),
            record: RecordMatch::counterpart(counterpart),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = FriendsConfig::from_lookup(lookup(&[])).unwrap();

        assert_eq!(config.path_name, "friends");
        assert!(config.do_index);
    }

    #[test]
    fn environment_overrides_defaults() {
        let config = FriendsConfig::from_lookup(lookup(&[
            (PATH_NAME_ENV, "contacts"),
            (DO_INDEX_ENV, "no"),
        ]))
        .unwrap();

        assert_eq!(config.path_name, "contacts");
        assert!(!config.do_index);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(FriendsConfig::from_lookup(lookup(&[(DO_INDEX_ENV, "maybe")])).is_err());
        assert!(FriendsConfig::from_lookup(lookup(&[(PATH_NAME_ENV, "  ")])).is_err());
        assert!(FriendsConfig::new().set_path_name("a.b").validate().is_err());
        assert!(FriendsConfig::new().set_path_name("$set").validate().is_err());
    }

    #[test]
    fn accessor_uses_configured_name() {
        let path = FriendsConfig::new()
            .set_path_name("contacts")
            .validate()
            .unwrap();
        let counterpart = PartyId::new();

        assert_eq!(path.index_name(), "contacts.id");
        assert_eq!(path.pull(counterpart).path, "contacts");
        match path.set_status(counterpart, Status::Accepted) {
            Update::SetStatus { path, .. } => assert_eq!(path, "contacts"),
            other => panic!("unexpected update {:?}", other),
        }
    }
}
