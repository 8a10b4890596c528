//! The claim store: one Merkle tree per identity, plus the relay's own tree
//! that anchors them all.
//!
//! Every identity tree lives in the shared storage under a prefix of its ID,
//! and the relay tree under `b"relay"`. Whenever an identity's root differs
//! from the one the relay last anchored for it, the relay writes a new
//! SetRootKey claim (next version) for it into the relay tree and asks the
//! publisher to get the new relay root onto the ledger. A
//! proof of claim then walks from the claim, up through the identity's root,
//! to a relay root somebody can check against the ledger.
//!
//! Locks are always taken in the same order: the identity map, then an
//! identity tree, then the relay tree.

use crate::{
    claim::{
        next_version, prev_version, Claim, ClaimAssignName, ClaimRevocation, ClaimSetRootKey, Entry, ProofClaim,
        ProofClaimPartial, SetRootAux, REVOKED_ELEM,
    },
    crypto::{hash::Hash, sign_key::SignKeypairPublic},
    error::{Error, Result},
    identity::{self, IdentityID},
    merkle::{MerkleTree, Storage},
    packet::discovery::NameResolver,
    publisher::{RootAnchor, RootPublisher},
    util::{self, Timestamp},
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info};

/// Storage prefix of the relay tree.
const RELAY_PREFIX: &[u8] = b"relay";

/// SetRootKey claims never use eras yet.
const ERA: u32 = 0;

/// An identity's tree, and the newest SetRootKey the relay holds for it.
struct IdentityTree {
    tree: MerkleTree,
    /// Version and identity root of the last SetRootKey written for this
    /// identity. Only moves once the relay tree has taken the write.
    anchor: Option<(u32, Hash)>,
}

type SharedTree = Arc<RwLock<IdentityTree>>;

pub struct ClaimStore {
    storage: Arc<dyn Storage>,
    max_levels: usize,
    identities: RwLock<HashMap<IdentityID, SharedTree>>,
    relay: RwLock<MerkleTree>,
    publisher: Arc<RootPublisher>,
}

impl ClaimStore {
    /// Open the store, picking up the relay tree where it was left.
    /// Identity trees are opened as they're asked for.
    pub fn new(storage: Arc<dyn Storage>, max_levels: usize, publisher: Arc<RootPublisher>) -> Result<Self> {
        let relay = MerkleTree::new(storage.with_prefix(RELAY_PREFIX), max_levels)?;
        Ok(Self {
            storage,
            max_levels,
            identities: RwLock::new(HashMap::new()),
            relay: RwLock::new(relay),
            publisher,
        })
    }

    fn identity_storage(&self, id: &IdentityID) -> Arc<dyn Storage> {
        self.storage.with_prefix(id.as_bytes())
    }

    /// Find an identity's tree, opening it from storage if this is the first
    /// time we've been asked about it.
    fn identity_tree(&self, id: &IdentityID) -> Result<SharedTree> {
        if let Some(tree) = util::read(&self.identities).get(id) {
            return Ok(tree.clone());
        }
        let mut identities = util::write(&self.identities);
        if let Some(tree) = identities.get(id) {
            return Ok(tree.clone());
        }
        let storage = self.identity_storage(id);
        if !MerkleTree::exists_in(&*storage)? {
            return Err(Error::StoreUnknownIdentity);
        }
        let tree = MerkleTree::new(storage, self.max_levels)?;
        let anchor = latest_set_root(&util::read(&self.relay), id)?;
        let shared = Arc::new(RwLock::new(IdentityTree { tree, anchor }));
        identities.insert(*id, shared.clone());
        Ok(shared)
    }

    /// Make sure the relay tree holds a SetRootKey for the identity's current
    /// root, writing the next version if it doesn't.
    fn anchor(&self, id: &IdentityID, ident: &mut IdentityTree) -> Result<()> {
        let root = ident.tree.root();
        let version = match ident.anchor {
            Some((_, anchored)) if anchored == root => return Ok(()),
            Some((version, _)) => version.checked_add(1).ok_or(Error::ClaimMalformed("version overflow"))?,
            None => 0,
        };
        let mut relay = util::write(&self.relay);
        relay.insert(&Claim::from(ClaimSetRootKey::new(version, ERA, *id, root)).entry())?;
        ident.anchor = Some((version, root));
        self.publisher.request(relay.root());
        debug!(id = %id, version, root = %root, "identity anchored");
        Ok(())
    }

    /// Create an identity from its three genesis keys.
    ///
    /// Returns the new ID and a proof of the operational key's AuthorizeKSign
    /// claim, ready to sign packets with.
    pub fn genesis(
        &self,
        op: &SignKeypairPublic,
        rec: &SignKeypairPublic,
        rev: &SignKeypairPublic,
    ) -> Result<(IdentityID, ProofClaim)> {
        let (id, claims) = identity::calculate_genesis(op, rec, rev, self.max_levels)?;
        {
            let mut identities = util::write(&self.identities);
            let storage = self.identity_storage(&id);
            if identities.contains_key(&id) || MerkleTree::exists_in(&*storage)? {
                return Err(Error::StoreIdentityExists);
            }
            let mut tree = MerkleTree::new(storage, self.max_levels)?;
            for claim in &claims {
                tree.insert(&claim.entry())?;
            }
            let mut ident = IdentityTree { tree, anchor: None };
            self.anchor(&id, &mut ident)?;
            identities.insert(id, Arc::new(RwLock::new(ident)));
        }
        info!(id = %id, "identity created");
        let proof = self.proof_of_claim(&id, &claims[0].hindex())?;
        Ok((id, proof))
    }

    /// Add a claim to an identity's tree and re-anchor the identity's root in
    /// the relay tree.
    ///
    /// A claim past version 0 needs its previous version in the tree, and that
    /// previous version can't be a revocation. SetRootKey and AssignName claims
    /// are the relay's alone and are refused here.
    pub fn add_claim(&self, id: &IdentityID, claim: &Claim) -> Result<()> {
        match claim {
            Claim::SetRootKey(_) | Claim::AssignName(_) => return Err(Error::StoreRelayOnlyClaim),
            Claim::Basic(basic) if basic.value() == &[REVOKED_ELEM; 4] => {
                return Err(Error::ClaimMalformed("value is reserved for revocations"));
            }
            _ => {}
        }
        let shared = self.identity_tree(id)?;
        let mut ident = util::write(&shared);
        let entry = claim.entry();
        check_previous_version(&ident.tree, &entry)?;
        ident.tree.insert(&entry)?;
        // also picks up a root a failed relay write left unanchored
        self.anchor(id, &mut ident)?;
        debug!(id = %id, claim = ?claim.claim_type(), version = claim.version(), "claim added");
        Ok(())
    }

    /// Revoke the current claim under `hindex` in an identity's tree by
    /// writing its tombstone, then re-anchor.
    ///
    /// Fails with `ClaimRevoked` if the claim is already revoked or has been
    /// superseded.
    pub fn revoke_claim(&self, id: &IdentityID, hindex: &Hash) -> Result<ClaimRevocation> {
        let shared = self.identity_tree(id)?;
        let mut ident = util::write(&shared);
        let entry = ident.tree.get_entry(hindex)?;
        if let Claim::Revocation(_) = Claim::from_entry(&entry)? {
            return Err(Error::ClaimRevoked);
        }
        let revocation = ClaimRevocation::of(&entry)?;
        let tomb = Claim::from(revocation.clone()).entry();
        match ident.tree.get_entry(&tomb.hindex()) {
            Ok(_) => return Err(Error::ClaimRevoked),
            Err(Error::MerkleNotFound) => {}
            Err(err) => return Err(err),
        }
        ident.tree.insert(&tomb)?;
        self.anchor(id, &mut ident)?;
        info!(id = %id, claim = ?revocation.revoked_type(), version = revocation.version(), "claim revoked");
        Ok(revocation)
    }

    /// Prove a claim is in an identity's tree and anchored by the relay.
    ///
    /// Anchors on the last published relay root if the claim made it in
    /// before that publish; otherwise on the current relay root, flagged as
    /// unpublished.
    pub fn proof_of_claim(&self, id: &IdentityID, hindex: &Hash) -> Result<ProofClaim> {
        let shared = self.identity_tree(id)?;
        let ident = util::read(&shared);
        let relay = util::read(&self.relay);
        let latest = ident.anchor.ok_or(Error::MerkleNotFound)?;

        let holds = |id_root: &Hash| ident.tree.get_entry_at(id_root, hindex).is_ok();
        let on_published = self.publisher.last_published().and_then(|last| {
            let found = set_root_at(&relay, &last.root(), id, latest.0).ok()??;
            holds(&found.1).then_some((last, found))
        });
        let (relay_root, date, published, (version, id_root)) = match on_published {
            Some((last, found)) => (last.root(), last.date(), true, found),
            None if holds(&latest.1) => (relay.root(), Timestamp::now(), false, latest),
            None => return Err(Error::MerkleNotFound),
        };

        let leaf = ident.tree.get_entry_at(&id_root, hindex)?;
        let level0 = prove_level(&ident.tree, &id_root, &leaf, Some(SetRootAux { version, era: ERA, id: *id }))?;
        let srk = Claim::from(ClaimSetRootKey::new(version, ERA, *id, id_root)).entry();
        let level1 = prove_level(&relay, &relay_root, &srk, None)?;
        Ok(ProofClaim::new(leaf, vec![level0, level1], date, published))
    }

    /// Prove a claim living directly in the relay tree (a name assignment,
    /// say).
    pub fn proof_of_relay_claim(&self, hindex: &Hash) -> Result<ProofClaim> {
        let relay = util::read(&self.relay);
        let (relay_root, date, published) = match self.publisher.last_published() {
            Some(last) if relay.get_entry_at(&last.root(), hindex).is_ok() => (last.root(), last.date(), true),
            _ => (relay.root(), Timestamp::now(), false),
        };
        let leaf = relay.get_entry_at(&relay_root, hindex)?;
        let level = prove_level(&relay, &relay_root, &leaf, None)?;
        Ok(ProofClaim::new(leaf, vec![level], date, published))
    }

    /// Bind `name` to an identity in the relay tree. A name can only ever be
    /// given out once.
    pub fn assign_name(&self, name: &str, id: &IdentityID) -> Result<ProofClaim> {
        // make sure the identity exists
        self.identity_tree(id)?;
        let claim = Claim::from(ClaimAssignName::new(0, name, *id));
        {
            let mut relay = util::write(&self.relay);
            relay.insert(&claim.entry())?;
            self.publisher.request(relay.root());
        }
        info!(id = %id, name, "name assigned");
        self.proof_of_relay_claim(&claim.hindex())
    }

    /// The relay tree's current root.
    pub fn relay_root(&self) -> Hash {
        util::read(&self.relay).root()
    }

    /// An identity tree's current root.
    pub fn identity_root(&self, id: &IdentityID) -> Result<Hash> {
        let shared = self.identity_tree(id)?;
        let root = util::read(&shared).tree.root();
        Ok(root)
    }

    /// Every claim in an identity's tree, revocations included.
    pub fn claims(&self, id: &IdentityID) -> Result<Vec<Claim>> {
        let shared = self.identity_tree(id)?;
        let entries = util::read(&shared).tree.entries()?;
        entries.iter().map(Claim::from_entry).collect()
    }
}

impl NameResolver for ClaimStore {
    fn resolve(&self, name: &str) -> Option<IdentityID> {
        let relay = util::read(&self.relay);
        // the id sits in the value half, so any id gives the same hindex
        let anyone = IdentityID::from_parts(identity::TYPE_DEFAULT, [0; 27]);
        let hindex = Claim::from(ClaimAssignName::new(0, name, anyone)).hindex();
        match Claim::from_entry(&relay.get_entry(&hindex).ok()?).ok()? {
            Claim::AssignName(claim) => Some(claim.id()),
            _ => None,
        }
    }
}

/// A claim past version 0 has to extend a previous version that is in the
/// tree and isn't a revocation.
fn check_previous_version(tree: &MerkleTree, entry: &Entry) -> Result<()> {
    let prev = match prev_version(entry) {
        Some(prev) => prev,
        None => return Ok(()),
    };
    match tree.get_entry(&prev.hindex()) {
        Ok(found) => match Claim::from_entry(&found)? {
            Claim::Revocation(_) => Err(Error::ClaimRevoked),
            _ => Ok(()),
        },
        Err(Error::MerkleNotFound) => Err(Error::StoreVersionGap),
        Err(err) => Err(err),
    }
}

/// The identity root carried by SetRootKey `version` for `id`, if the relay
/// tree had it as of `root`.
fn set_root_entry(relay: &MerkleTree, root: &Hash, id: &IdentityID, version: u32) -> Result<Option<Hash>> {
    // the identity root sits in the value half, so it doesn't matter here
    let hindex = Claim::from(ClaimSetRootKey::new(version, ERA, *id, Hash::EMPTY)).hindex();
    match relay.get_entry_at(root, &hindex) {
        Ok(entry) => match Claim::from_entry(&entry)? {
            Claim::SetRootKey(claim) => Ok(Some(claim.root())),
            _ => Err(Error::ClaimMalformed("expected a set root key claim")),
        },
        Err(Error::MerkleNotFound) => Ok(None),
        Err(err) => Err(err),
    }
}

/// Newest SetRootKey for `id` in the relay tree as of `root`, no newer than
/// `upto`.
///
/// SetRootKey versions go in one at a time and never come out, so any relay
/// root holds exactly versions `0..=k` for some `k`. Binary search for it.
fn set_root_at(relay: &MerkleTree, root: &Hash, id: &IdentityID, upto: u32) -> Result<Option<(u32, Hash)>> {
    let mut found = None;
    let (mut lo, mut hi) = (0u64, u64::from(upto) + 1);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        // mid <= upto, so this never truncates
        let version = mid as u32;
        match set_root_entry(relay, root, id, version)? {
            Some(id_root) => {
                found = Some((version, id_root));
                lo = mid + 1;
            }
            None => hi = mid,
        }
    }
    Ok(found)
}

/// Newest SetRootKey for `id` in the current relay tree. Used when an identity
/// is opened from storage; after that its anchor is kept in memory.
fn latest_set_root(relay: &MerkleTree, id: &IdentityID) -> Result<Option<(u32, Hash)>> {
    let root = relay.root();
    // double the bound until it's past the newest version
    let mut bound = 0u32;
    while bound < u32::MAX && set_root_entry(relay, &root, id, bound)?.is_some() {
        bound = bound.saturating_mul(2).saturating_add(1);
    }
    set_root_at(relay, &root, id, bound)
}

/// Existence of `leaf` and non-existence of its next version, both at `root`.
fn prove_level(tree: &MerkleTree, root: &Hash, leaf: &Entry, aux: Option<SetRootAux>) -> Result<ProofClaimPartial> {
    let next = next_version(leaf)?;
    let mtp0 = tree.prove_non_existence_at(root, &next.hindex()).map_err(|err| match err {
        Error::MerkleEntryExists => Error::ClaimRevoked,
        err => err,
    })?;
    let mtp1 = tree.prove_existence_at(root, &leaf.hindex())?;
    Ok(ProofClaimPartial::new(mtp0, mtp1, *root, aux))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        claim::{ClaimAuthorizeKSign, ClaimBasic, KeyUsage},
        config::PublisherConfig,
        crypto::sign_key::SignKeypair,
        merkle::MemStorage,
        publisher::MemLedger,
        util::test,
    };
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixture {
        storage: MemStorage,
        publisher: Arc<RootPublisher>,
        store: ClaimStore,
    }

    fn fixture() -> Fixture {
        let storage = MemStorage::new();
        let publisher = Arc::new(RootPublisher::new(Arc::new(MemLedger::new()), PublisherConfig::default()));
        let store = ClaimStore::new(Arc::new(storage.clone()), 140, publisher.clone()).unwrap();
        Fixture {
            storage,
            publisher,
            store,
        }
    }

    fn basic(version: u32, tag: u8) -> Claim {
        ClaimBasic::new(version, [[tag; 32], [0; 32], [0; 32]], [[tag; 32], [1; 32], [0; 32], [0; 32]]).into()
    }

    fn new_identity(store: &ClaimStore) -> (IdentityID, ProofClaim) {
        let keys = test::genesis_keys(&mut test::rng());
        let (op, rec, rev) = keys.publics();
        store.genesis(&op, &rec, &rev).unwrap()
    }

    #[test]
    fn genesis_gives_a_working_ksign_proof() {
        let fx = fixture();
        let keys = test::genesis_keys(&mut test::rng());
        let (op, rec, rev) = keys.publics();
        let (id, proof) = fx.store.genesis(&op, &rec, &rev).unwrap();
        assert_eq!(proof.verify(), Ok(()));
        assert_eq!(proof.identity(), Some(id));
        assert_eq!(proof.root(), Ok(fx.store.relay_root()));
        assert!(!proof.published());
        assert_eq!(
            proof.claim().unwrap(),
            Claim::from(ClaimAuthorizeKSign::new(0, op, KeyUsage::OPERATIONAL))
        );
        assert_eq!(fx.store.claims(&id).unwrap().len(), 3);
        assert_eq!(fx.publisher.requested(), fx.store.relay_root());

        assert_eq!(fx.store.genesis(&op, &rec, &rev).map(|(id, _)| id), Err(Error::StoreIdentityExists));
    }

    #[test]
    fn genesis_is_deterministic_across_storage() {
        let (id1, _) = new_identity(&fixture().store);
        let (id2, _) = new_identity(&fixture().store);
        assert_eq!(id1, id2);
    }

    #[test]
    fn unknown_identity() {
        let fx = fixture();
        let id = test::fake_id(1);
        assert_eq!(fx.store.add_claim(&id, &basic(0, 1)), Err(Error::StoreUnknownIdentity));
        assert_eq!(fx.store.proof_of_claim(&id, &Hash::EMPTY).map(|_| ()), Err(Error::StoreUnknownIdentity));
        assert_eq!(fx.store.identity_root(&id), Err(Error::StoreUnknownIdentity));
        assert_eq!(fx.store.assign_name("a.eth", &id).map(|_| ()), Err(Error::StoreUnknownIdentity));
    }

    #[test]
    fn add_claim_reanchors_identity() {
        let fx = fixture();
        let (id, _) = new_identity(&fx.store);
        let relay_before = fx.store.relay_root();
        let claim = basic(0, 7);
        fx.store.add_claim(&id, &claim).unwrap();
        assert_ne!(fx.store.relay_root(), relay_before);

        let proof = fx.store.proof_of_claim(&id, &claim.hindex()).unwrap();
        assert_eq!(proof.verify(), Ok(()));
        assert_eq!(proof.claim().unwrap(), claim);
        assert_eq!(proof.proofs()[0].root(), &fx.store.identity_root(&id).unwrap());
        assert_eq!(proof.proofs()[0].aux().map(|aux| aux.version), Some(1));

        // adding it again changes nothing
        let relay_root = fx.store.relay_root();
        fx.store.add_claim(&id, &claim).unwrap();
        assert_eq!(fx.store.relay_root(), relay_root);
        // a different claim under the same hindex is refused
        let clash = ClaimBasic::new(0, [[7; 32], [0; 32], [0; 32]], [[9; 32]; 4]).into();
        assert_eq!(fx.store.add_claim(&id, &clash), Err(Error::MerkleDuplicateKey));
        assert_eq!(fx.store.relay_root(), relay_root);

        assert_eq!(fx.store.proof_of_claim(&id, &basic(0, 8).hindex()).map(|_| ()), Err(Error::MerkleNotFound));
    }

    #[test]
    fn revoked_claims_have_no_proof() {
        let fx = fixture();
        let (id, _) = new_identity(&fx.store);
        fx.store.add_claim(&id, &basic(0, 3)).unwrap();
        fx.store.add_claim(&id, &basic(1, 3)).unwrap();
        assert_eq!(fx.store.proof_of_claim(&id, &basic(0, 3).hindex()).map(|_| ()), Err(Error::ClaimRevoked));
        assert!(fx.store.proof_of_claim(&id, &basic(1, 3).hindex()).unwrap().verify().is_ok());
    }

    #[tokio::test]
    async fn proofs_prefer_the_published_root() {
        let fx = fixture();
        let (id, _) = new_identity(&fx.store);
        let published_root = fx.store.relay_root();
        let published = fx.publisher.commit(published_root).await.unwrap().unwrap();

        let old = basic(0, 1);
        let (op, _, _) = test::genesis_keys(&mut test::rng()).publics();
        let op_hindex = Claim::from(ClaimAuthorizeKSign::new(0, op, KeyUsage::OPERATIONAL)).hindex();
        fx.store.add_claim(&id, &old).unwrap();

        // the genesis claim was in before the publish, so it anchors there
        let proof = fx.store.proof_of_claim(&id, &op_hindex).unwrap();
        assert!(proof.published());
        assert_eq!(proof.date(), published.date());
        assert_eq!(proof.root(), Ok(published_root));
        assert_eq!(proof.verify(), Ok(()));

        // the new one only exists in the unpublished root
        let proof = fx.store.proof_of_claim(&id, &old.hindex()).unwrap();
        assert!(!proof.published());
        assert_eq!(proof.root(), Ok(fx.store.relay_root()));
        assert_eq!(proof.verify(), Ok(()));
    }

    #[tokio::test]
    async fn names() {
        let fx = fixture();
        let (id, _) = new_identity(&fx.store);
        let proof = fx.store.assign_name("example.eth", &id).unwrap();
        assert_eq!(proof.verify(), Ok(()));
        assert_eq!(proof.identity(), None);
        match proof.claim().unwrap() {
            Claim::AssignName(claim) => {
                assert!(claim.is_name("example.eth"));
                assert_eq!(claim.id(), id);
            }
            other => panic!("unexpected claim {:?}", other),
        }
        assert_eq!(fx.store.resolve("example.eth"), Some(id));
        assert_eq!(fx.store.resolve("nobody.eth"), None);

        // same name, same owner: fine. someone else: no.
        assert!(fx.store.assign_name("example.eth", &id).is_ok());
        let other_keys = test::genesis_keys(&mut test::rng_seeded(b"other"));
        let (op, rec, rev) = other_keys.publics();
        let (other, _) = fx.store.genesis(&op, &rec, &rev).unwrap();
        assert_eq!(fx.store.assign_name("example.eth", &other).map(|_| ()), Err(Error::MerkleDuplicateKey));

        fx.publisher.commit(fx.store.relay_root()).await.unwrap();
        let hindex = Claim::from(ClaimAssignName::new(0, "example.eth", id)).hindex();
        assert!(fx.store.proof_of_relay_claim(&hindex).unwrap().published());
    }

    #[test]
    fn relay_only_claims_are_refused() {
        let fx = fixture();
        let (id, _) = new_identity(&fx.store);
        let victim = test::fake_id(9);
        let srk = Claim::from(ClaimSetRootKey::new(0, ERA, victim, Hash::new([7; 32])));
        let name = Claim::from(ClaimAssignName::new(0, "victim.eth", victim));
        let root = fx.store.identity_root(&id).unwrap();
        assert_eq!(fx.store.add_claim(&id, &srk), Err(Error::StoreRelayOnlyClaim));
        assert_eq!(fx.store.add_claim(&id, &name), Err(Error::StoreRelayOnlyClaim));
        assert_eq!(fx.store.identity_root(&id), Ok(root));
    }

    #[test]
    fn versions_have_no_gaps() {
        let fx = fixture();
        let (id, _) = new_identity(&fx.store);
        assert_eq!(fx.store.add_claim(&id, &basic(1, 2)), Err(Error::StoreVersionGap));
        fx.store.add_claim(&id, &basic(0, 2)).unwrap();
        fx.store.add_claim(&id, &basic(1, 2)).unwrap();
        assert_eq!(fx.store.add_claim(&id, &basic(3, 2)), Err(Error::StoreVersionGap));

        let reserved = ClaimBasic::new(0, [[5; 32], [0; 32], [0; 32]], [REVOKED_ELEM; 4]).into();
        assert_eq!(
            fx.store.add_claim(&id, &reserved),
            Err(Error::ClaimMalformed("value is reserved for revocations"))
        );
    }

    #[test]
    fn revocation_is_final() {
        let fx = fixture();
        let (id, _) = new_identity(&fx.store);
        let claim = basic(0, 3);
        fx.store.add_claim(&id, &claim).unwrap();
        let relay_before = fx.store.relay_root();

        let revocation = fx.store.revoke_claim(&id, &claim.hindex()).unwrap();
        assert_eq!(revocation.version(), 1);
        assert_ne!(fx.store.relay_root(), relay_before);
        assert_eq!(fx.store.proof_of_claim(&id, &claim.hindex()).map(|_| ()), Err(Error::ClaimRevoked));
        assert!(fx.store.claims(&id).unwrap().contains(&Claim::from(revocation.clone())));

        // the tombstone has a proof, but it proves a tombstone
        let tomb = Claim::from(revocation);
        let proof = fx.store.proof_of_claim(&id, &tomb.hindex()).unwrap();
        assert_eq!(proof.verify(), Ok(()));
        assert_eq!(proof.claim().unwrap(), tomb);

        // no reviving it, no revoking it twice
        assert_eq!(fx.store.add_claim(&id, &basic(1, 3)), Err(Error::MerkleDuplicateKey));
        assert_eq!(fx.store.add_claim(&id, &basic(2, 3)), Err(Error::ClaimRevoked));
        assert_eq!(fx.store.revoke_claim(&id, &claim.hindex()).map(|_| ()), Err(Error::ClaimRevoked));
        assert_eq!(fx.store.revoke_claim(&id, &tomb.hindex()).map(|_| ()), Err(Error::ClaimRevoked));
        assert_eq!(fx.store.revoke_claim(&id, &basic(0, 4).hindex()).map(|_| ()), Err(Error::MerkleNotFound));
    }

    #[test]
    fn superseded_claims_cant_be_revoked() {
        let fx = fixture();
        let (id, _) = new_identity(&fx.store);
        fx.store.add_claim(&id, &basic(0, 3)).unwrap();
        fx.store.add_claim(&id, &basic(1, 3)).unwrap();
        assert_eq!(fx.store.revoke_claim(&id, &basic(0, 3).hindex()).map(|_| ()), Err(Error::ClaimRevoked));
        assert_eq!(fx.store.revoke_claim(&id, &basic(1, 3).hindex()).map(|r| r.version()), Ok(2));
    }

    /// Storage whose relay-tree writes fail while `fail` is set.
    #[derive(Clone)]
    struct FlakyStorage {
        inner: Arc<dyn Storage>,
        relay: bool,
        fail: Arc<AtomicBool>,
    }

    impl Storage for FlakyStorage {
        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
            self.inner.get(key)
        }

        fn write_batch(&self, batch: Vec<(Vec<u8>, Vec<u8>)>) -> Result<()> {
            if self.relay && self.fail.load(Ordering::SeqCst) {
                return Err(Error::Storage("relay disk full".into()));
            }
            self.inner.write_batch(batch)
        }

        fn with_prefix(&self, prefix: &[u8]) -> Arc<dyn Storage> {
            Arc::new(FlakyStorage {
                inner: self.inner.with_prefix(prefix),
                relay: prefix == RELAY_PREFIX,
                fail: self.fail.clone(),
            })
        }
    }

    #[test]
    fn retry_after_failed_anchor_reanchors() {
        let fail = Arc::new(AtomicBool::new(false));
        let storage = FlakyStorage {
            inner: Arc::new(MemStorage::new()),
            relay: false,
            fail: fail.clone(),
        };
        let publisher = Arc::new(RootPublisher::new(Arc::new(MemLedger::new()), PublisherConfig::default()));
        let store = ClaimStore::new(Arc::new(storage), 140, publisher).unwrap();
        let (id, _) = new_identity(&store);
        let relay_before = store.relay_root();

        let claim = basic(0, 6);
        fail.store(true, Ordering::SeqCst);
        assert_eq!(store.add_claim(&id, &claim), Err(Error::Storage("relay disk full".into())));
        assert_eq!(store.relay_root(), relay_before);
        // in the identity tree, but nothing anchors it
        assert_eq!(store.proof_of_claim(&id, &claim.hindex()).map(|_| ()), Err(Error::MerkleNotFound));

        fail.store(false, Ordering::SeqCst);
        store.add_claim(&id, &claim).unwrap();
        assert_ne!(store.relay_root(), relay_before);
        let proof = store.proof_of_claim(&id, &claim.hindex()).unwrap();
        assert_eq!(proof.verify(), Ok(()));
        assert_eq!(proof.proofs()[0].aux().map(|aux| aux.version), Some(1));
        assert_eq!(proof.proofs()[0].root(), &store.identity_root(&id).unwrap());
    }

    #[test]
    fn set_root_search() {
        let mut relay = MerkleTree::new(Arc::new(MemStorage::new()), 140).unwrap();
        let id = test::fake_id(3);
        let other = test::fake_id(4);
        relay.insert(&Claim::from(ClaimSetRootKey::new(0, ERA, other, Hash::new([1; 32]))).entry()).unwrap();
        assert_eq!(latest_set_root(&relay, &id), Ok(None));

        let mut roots = Vec::new();
        for version in 0..10u8 {
            let srk = ClaimSetRootKey::new(u32::from(version), ERA, id, Hash::new([version; 32]));
            relay.insert(&Claim::from(srk).entry()).unwrap();
            roots.push(relay.root());
        }
        for (version, root) in roots.iter().enumerate() {
            let expected = Some((version as u32, Hash::new([version as u8; 32])));
            assert_eq!(set_root_at(&relay, root, &id, 9), Ok(expected));
        }
        assert_eq!(set_root_at(&relay, &roots[9], &id, 4), Ok(Some((4, Hash::new([4; 32])))));
        assert_eq!(latest_set_root(&relay, &id), Ok(Some((9, Hash::new([9; 32])))));
        assert_eq!(latest_set_root(&relay, &other), Ok(Some((0, Hash::new([1; 32])))));
    }

    #[test]
    fn reopen_from_storage() {
        let fx = fixture();
        let (id, _) = new_identity(&fx.store);
        fx.store.add_claim(&id, &basic(0, 4)).unwrap();
        let relay_root = fx.store.relay_root();

        let reopened = ClaimStore::new(Arc::new(fx.storage.clone()), 140, fx.publisher.clone()).unwrap();
        assert_eq!(reopened.relay_root(), relay_root);
        assert_eq!(reopened.identity_root(&id), fx.store.identity_root(&id));
        assert!(reopened.proof_of_claim(&id, &basic(0, 4).hindex()).unwrap().verify().is_ok());
        reopened.add_claim(&id, &basic(0, 5)).unwrap();
        let proof = reopened.proof_of_claim(&id, &basic(0, 5).hindex()).unwrap();
        assert_eq!(proof.proofs()[0].aux().map(|aux| aux.version), Some(2));
    }

    #[test]
    fn concurrent_identities() {
        let fx = fixture();
        let store = Arc::new(fx.store);
        let handles = (0..4u8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let mut rng = test::rng_seeded(&[i]);
                    let keys = [0; 3].map(|_| SignKeypair::new_ed25519(&mut rng).public());
                    let (id, _) = store.genesis(&keys[0], &keys[1], &keys[2]).unwrap();
                    for tag in 0..5 {
                        store.add_claim(&id, &basic(0, tag)).unwrap();
                    }
                    id
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            let id = handle.join().unwrap();
            for tag in 0..5 {
                assert!(store.proof_of_claim(&id, &basic(0, tag).hindex()).unwrap().verify().is_ok());
            }
        }
    }
}
