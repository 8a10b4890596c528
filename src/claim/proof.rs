//! Proof that a claim is in its identity's tree, that the identity's tree root
//! is anchored in the relay's tree, and that neither has been superseded.

use crate::{
    claim::{next_version, Claim, ClaimSetRootKey, Entry},
    crypto::hash::Hash,
    error::{Error, Result},
    identity::IdentityID,
    merkle::Proof,
    util::Timestamp,
};
use serde_derive::{Deserialize, Serialize};

/// Levels in a proof of a claim from an identity's tree: the identity tree,
/// then the relay tree.
pub const IDENTITY_CLAIM_LEVELS: usize = 2;

/// Levels in a proof of a claim living directly in the relay tree.
pub const RELAY_CLAIM_LEVELS: usize = 1;

/// Describes the SetRootKey claim that anchors one level's root in the next
/// level up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetRootAux {
    pub version: u32,
    pub era: u32,
    pub id: IdentityID,
}

/// One level of a [`ProofClaim`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
pub struct ProofClaimPartial {
    /// Non-existence of the leaf's next version (the leaf is not revoked).
    mtp0: Proof,
    /// Existence of the leaf.
    mtp1: Proof,
    /// The tree root both proofs are against.
    root: Hash,
    /// How to build the leaf for the next level. `None` on the last level.
    aux: Option<SetRootAux>,
}

impl ProofClaimPartial {
    pub fn new(mtp0: Proof, mtp1: Proof, root: Hash, aux: Option<SetRootAux>) -> Self {
        Self { mtp0, mtp1, root, aux }
    }
}

/// A claim plus the chain of proofs that tie it to a relay root.
///
/// For a claim in an identity's tree there are two levels: the identity tree,
/// then the relay tree (via the SetRootKey claim the relay holds for that
/// identity). Claims living directly in the relay tree (name assignments) have
/// one.
///
/// `verify()` only checks internal consistency. Whether the final root is one
/// worth trusting is up to the caller, who has to check it against roots they
/// know were published, and so is the number of levels: a verifier expecting a
/// key authorization wants [`IDENTITY_CLAIM_LEVELS`], one expecting a name
/// wants [`RELAY_CLAIM_LEVELS`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters, getset::CopyGetters)]
pub struct ProofClaim {
    /// The claim being proven, as a raw entry.
    #[getset(get = "pub")]
    leaf: Entry,
    /// Proof levels, from the claim's own tree up to the relay tree.
    #[getset(get = "pub")]
    proofs: Vec<ProofClaimPartial>,
    /// When the cited root was published, or when the proof was made if it
    /// wasn't.
    #[getset(get_copy = "pub")]
    date: Timestamp,
    /// Whether the final root had been published when the proof was made.
    #[getset(get_copy = "pub")]
    published: bool,
}

impl ProofClaim {
    pub fn new(leaf: Entry, proofs: Vec<ProofClaimPartial>, date: Timestamp, published: bool) -> Self {
        Self {
            leaf,
            proofs,
            date,
            published,
        }
    }

    /// The relay root this proof ends at.
    pub fn root(&self) -> Result<Hash> {
        self.proofs.last().map(|p| p.root).ok_or(Error::PacketInvalidProof)
    }

    /// The identity whose tree holds the claim, if it isn't a relay claim.
    pub fn identity(&self) -> Option<IdentityID> {
        self.proofs.first().and_then(|p| p.aux).map(|aux| aux.id)
    }

    /// Decode the claim.
    pub fn claim(&self) -> Result<Claim> {
        Claim::from_entry(&self.leaf)
    }

    /// Walk every level: the leaf must exist and its next version must not,
    /// then the leaf becomes the SetRootKey claim for that level's root.
    pub fn verify(&self) -> Result<()> {
        if self.proofs.is_empty() {
            return Err(Error::PacketInvalidProof);
        }
        let last = self.proofs.len() - 1;
        let mut leaf = self.leaf;
        for (i, level) in self.proofs.iter().enumerate() {
            let hindex = leaf.hindex();
            if !level.mtp1.existence() || !level.mtp1.verify(&level.root, &hindex, &leaf.hvalue()) {
                return Err(Error::PacketInvalidProof);
            }
            let next = next_version(&leaf).map_err(|_| Error::PacketInvalidProof)?;
            if level.mtp0.existence() || !level.mtp0.verify(&level.root, &next.hindex(), &Hash::EMPTY) {
                return Err(Error::PacketInvalidProof);
            }
            match (&level.aux, i == last) {
                (Some(aux), false) => {
                    leaf = Claim::from(ClaimSetRootKey::new(aux.version, aux.era, aux.id, level.root)).entry();
                }
                (None, true) => {}
                _ => return Err(Error::PacketInvalidProof),
            }
        }
        Ok(())
    }
}
