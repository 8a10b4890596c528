//! Who do we trust, and who owns which name.
//!
//! Both are collaborators the verifier asks questions of. The in-memory
//! versions load from the JSON documents relays pass around:
//!
//! ```json
//! { "<id>": { "name": "some-relay", "kOpPub": "<key>", "trusted": { "relay": true } } }
//! ```
//!
//! and
//!
//! ```json
//! { "example.eth": "<id>" }
//! ```

use crate::{crypto::sign_key::SignKeypairPublic, error::Result, identity::IdentityID, util::ser};
use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;

/// Decides whether an identity is in the trusted set.
pub trait Discovery: Send + Sync {
    fn is_trusted(&self, id: &IdentityID) -> bool;
}

/// Maps a name to the identity that owns it.
pub trait NameResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<IdentityID>;
}

/// The roles an entity is trusted for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Trusted {
    #[serde(default)]
    pub relay: bool,
}

/// What discovery knows about one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
pub struct Entity {
    name: String,
    #[serde(rename = "kOpPub", default)]
    k_op_pub: Option<SignKeypairPublic>,
    #[serde(default)]
    trusted: Trusted,
}

impl Entity {
    pub fn new<T: Into<String>>(name: T, k_op_pub: Option<SignKeypairPublic>, trusted: Trusted) -> Self {
        Self {
            name: name.into(),
            k_op_pub,
            trusted,
        }
    }
}

/// Discovery backed by a map loaded up front.
#[derive(Debug, Clone, Default)]
pub struct MemDiscovery {
    entities: HashMap<IdentityID, Entity>,
}

impl MemDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let entities: HashMap<IdentityID, Entity> = ser::deserialize_json(json.as_bytes())?;
        Ok(Self { entities })
    }

    pub fn add(&mut self, id: IdentityID, entity: Entity) {
        self.entities.insert(id, entity);
    }

    pub fn entity(&self, id: &IdentityID) -> Option<&Entity> {
        self.entities.get(id)
    }
}

impl Discovery for MemDiscovery {
    fn is_trusted(&self, id: &IdentityID) -> bool {
        self.entities.get(id).map(|e| e.trusted.relay).unwrap_or(false)
    }
}

/// A fixed name table.
#[derive(Debug, Clone, Default)]
pub struct MemNameResolver {
    names: HashMap<String, IdentityID>,
}

impl MemNameResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let names: HashMap<String, IdentityID> = ser::deserialize_json(json.as_bytes())?;
        Ok(Self { names })
    }

    pub fn add<T: Into<String>>(&mut self, name: T, id: IdentityID) {
        self.names.insert(name.into(), id);
    }
}

impl NameResolver for MemNameResolver {
    fn resolve(&self, name: &str) -> Option<IdentityID> {
        self.names.get(name).copied()
    }
}
