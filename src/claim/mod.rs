//! Claims are the facts an identity (or the relay itself) writes into its tree.
//!
//! Every claim encodes to exactly one [`Entry`] and every well-formed entry
//! decodes to exactly one claim. The first element of an entry is the claim
//! header:
//!
//! ```text
//! bytes  0..16  reserved (zero)
//! bytes 16..20  era (SetRootKey only, zero otherwise)
//! bytes 20..24  version, u32 big endian
//! bytes 24..32  claim type, u64 big endian
//! ```
//!
//! Claims are never overwritten. To supersede a claim, the same claim is
//! written again with `version + 1`; a claim is current as long as its next
//! version does not exist in the tree. This is what the `mtp0` half of a
//! [`ProofClaim`] proves.
//!
//! Revoking a claim writes a [`ClaimRevocation`] in that same `version + 1`
//! slot: the claim's index half with every value element set to `0xff`. It
//! takes the slot a non-revocation proof checks, decodes as nothing a verifier
//! accepts, and nothing can be written after it.

use crate::{
    crypto::{
        hash::{ElemBytes, Hash},
        sign_key::SignKeypairPublic,
    },
    error::{Error, Result},
    identity::IdentityID,
};
use std::fmt;

mod entry;
mod proof;

pub use entry::*;
pub use proof::*;

const TYPE_RANGE: std::ops::Range<usize> = 24..32;
const VERSION_RANGE: std::ops::Range<usize> = 20..24;
const ERA_RANGE: std::ops::Range<usize> = 16..20;

/// Every value element of a revocation.
pub(crate) const REVOKED_ELEM: ElemBytes = [0xff; 32];

/// The type tag of a claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum ClaimType {
    /// Opaque application data.
    Basic = 0,
    /// Binds a signing key to an identity.
    AuthorizeKSign = 1,
    /// Binds an identity to one of its tree roots (lives in the relay tree).
    SetRootKey = 2,
    /// Binds a name to an identity (lives in the relay tree).
    AssignName = 3,
}

impl TryFrom<u64> for ClaimType {
    type Error = Error;
    fn try_from(val: u64) -> Result<Self> {
        match val {
            0 => Ok(Self::Basic),
            1 => Ok(Self::AuthorizeKSign),
            2 => Ok(Self::SetRootKey),
            3 => Ok(Self::AssignName),
            _ => Err(Error::ClaimUnknownVariant(val)),
        }
    }
}

/// What an authorized key may be used for. A set of flags, never empty.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyUsage(u8);

impl KeyUsage {
    /// Day-to-day signing (packets, assertions).
    pub const OPERATIONAL: KeyUsage = KeyUsage(0x01);
    /// Recovering the identity if the operational key is lost.
    pub const RECOVERY: KeyUsage = KeyUsage(0x02);
    /// Revoking other keys.
    pub const REVOCATION: KeyUsage = KeyUsage(0x04);

    const ALL: u8 = 0x07;

    /// Parse usage flags, rejecting unknown bits and the empty set.
    pub fn from_bits(bits: u8) -> Result<Self> {
        if bits == 0 || bits & !Self::ALL != 0 {
            return Err(Error::ClaimMalformed("invalid key usage flags"));
        }
        Ok(Self(bits))
    }

    /// The raw bits.
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Does this usage include all of `other`'s flags?
    pub fn contains(&self, other: KeyUsage) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for KeyUsage {
    type Output = KeyUsage;
    fn bitor(self, rhs: Self) -> Self::Output {
        KeyUsage(self.0 | rhs.0)
    }
}

impl fmt::Debug for KeyUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [(Self::OPERATIONAL, "OPERATIONAL"), (Self::RECOVERY, "RECOVERY"), (Self::REVOCATION, "REVOCATION")]
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect::<Vec<_>>();
        write!(f, "KeyUsage({})", names.join(" | "))
    }
}

/// Authorizes a signing key for the identity whose tree holds the claim.
#[derive(Debug, Clone, PartialEq, Eq, getset::CopyGetters)]
#[getset(get_copy = "pub")]
pub struct ClaimAuthorizeKSign {
    version: u32,
    key: SignKeypairPublic,
    usage: KeyUsage,
}

impl ClaimAuthorizeKSign {
    pub fn new(version: u32, key: SignKeypairPublic, usage: KeyUsage) -> Self {
        Self { version, key, usage }
    }
}

/// Records that an identity's tree had `root` as of `version`. Lives in the
/// relay tree.
#[derive(Debug, Clone, PartialEq, Eq, getset::CopyGetters)]
#[getset(get_copy = "pub")]
pub struct ClaimSetRootKey {
    version: u32,
    era: u32,
    id: IdentityID,
    root: Hash,
}

impl ClaimSetRootKey {
    pub fn new(version: u32, era: u32, id: IdentityID, root: Hash) -> Self {
        Self { version, era, id, root }
    }
}

/// Binds a name to an identity. The name itself is not stored, only its hash.
#[derive(Debug, Clone, PartialEq, Eq, getset::CopyGetters)]
#[getset(get_copy = "pub")]
pub struct ClaimAssignName {
    version: u32,
    name_hash: Hash,
    id: IdentityID,
}

impl ClaimAssignName {
    /// Assign a plain name to an identity.
    pub fn new(version: u32, name: &str, id: IdentityID) -> Self {
        Self::from_hash(version, Hash::name(name), id)
    }

    /// Build from an already-hashed name.
    pub fn from_hash(version: u32, name_hash: Hash, id: IdentityID) -> Self {
        Self { version, name_hash, id }
    }

    /// Does this claim cover `name`?
    pub fn is_name(&self, name: &str) -> bool {
        self.name_hash == Hash::name(name)
    }
}

/// Application data the relay doesn't interpret.
#[derive(Debug, Clone, PartialEq, Eq, getset::Getters, getset::CopyGetters)]
pub struct ClaimBasic {
    #[getset(get_copy = "pub")]
    version: u32,
    #[getset(get = "pub")]
    index: [ElemBytes; 3],
    #[getset(get = "pub")]
    value: [ElemBytes; 4],
}

impl ClaimBasic {
    pub fn new(version: u32, index: [ElemBytes; 3], value: [ElemBytes; 4]) -> Self {
        Self { version, index, value }
    }
}

/// The tombstone for a claim. Holds the revoked claim's index half, header
/// included, with the version bumped by one.
#[derive(Debug, Clone, PartialEq, Eq, getset::CopyGetters)]
pub struct ClaimRevocation {
    /// One past the revoked claim's version.
    #[getset(get_copy = "pub")]
    version: u32,
    /// The type of the revoked claim.
    #[getset(get_copy = "pub")]
    revoked_type: ClaimType,
    index: [ElemBytes; 4],
}

impl ClaimRevocation {
    /// The revocation of the claim stored as `entry`.
    pub fn of(entry: &Entry) -> Result<Self> {
        let next = next_version(entry)?;
        let (revoked_type, version) = read_header(&next.elems()[0])?;
        let mut index = [[0u8; 32]; 4];
        index.copy_from_slice(next.index());
        Ok(Self { version, revoked_type, index })
    }
}

/// Any claim we know how to put in a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Claim {
    Basic(ClaimBasic),
    AuthorizeKSign(ClaimAuthorizeKSign),
    SetRootKey(ClaimSetRootKey),
    AssignName(ClaimAssignName),
    Revocation(ClaimRevocation),
}

impl Claim {
    /// This claim's type tag. A revocation carries the tag of the claim it
    /// revokes.
    pub fn claim_type(&self) -> ClaimType {
        match self {
            Self::Basic(_) => ClaimType::Basic,
            Self::AuthorizeKSign(_) => ClaimType::AuthorizeKSign,
            Self::SetRootKey(_) => ClaimType::SetRootKey,
            Self::AssignName(_) => ClaimType::AssignName,
            Self::Revocation(c) => c.revoked_type,
        }
    }

    /// This claim's version.
    pub fn version(&self) -> u32 {
        match self {
            Self::Basic(c) => c.version,
            Self::AuthorizeKSign(c) => c.version,
            Self::SetRootKey(c) => c.version,
            Self::AssignName(c) => c.version,
            Self::Revocation(c) => c.version,
        }
    }

    /// Encode into a tree entry.
    pub fn entry(&self) -> Entry {
        let mut entry = Entry::default();
        let elems = entry.elems_mut();
        write_header(&mut elems[0], self.claim_type(), self.version());
        match self {
            Self::Basic(c) => {
                elems[1..4].copy_from_slice(&c.index);
                elems[4..8].copy_from_slice(&c.value);
            }
            Self::AuthorizeKSign(c) => {
                elems[1][30] = c.key.algo();
                elems[1][31] = c.usage.bits();
                elems[2] = *c.key.as_bytes();
            }
            Self::SetRootKey(c) => {
                elems[0][ERA_RANGE].copy_from_slice(&c.era.to_be_bytes());
                elems[1][1..].copy_from_slice(c.id.as_bytes());
                elems[4] = *c.root.as_bytes();
            }
            Self::AssignName(c) => {
                elems[1] = *c.name_hash.as_bytes();
                elems[4][1..].copy_from_slice(c.id.as_bytes());
            }
            Self::Revocation(c) => {
                elems[..4].copy_from_slice(&c.index);
                elems[4..].fill(REVOKED_ELEM);
            }
        }
        entry
    }

    /// The tree key this claim lives under.
    pub fn hindex(&self) -> Hash {
        self.entry().hindex()
    }

    /// Decode a tree entry.
    pub fn from_entry(entry: &Entry) -> Result<Self> {
        let elems = entry.elems();
        let (ty, version) = read_header(&elems[0])?;
        if elems[4..].iter().all(|elem| elem == &REVOKED_ELEM) {
            expect_zero(&elems[0][..ERA_RANGE.start], "reserved header bytes set")?;
            if version == 0 {
                return Err(Error::ClaimMalformed("revocation of nothing"));
            }
            let mut index = [[0u8; 32]; 4];
            index.copy_from_slice(entry.index());
            return Ok(Self::Revocation(ClaimRevocation {
                version,
                revoked_type: ty,
                index,
            }));
        }
        let claim = match ty {
            ClaimType::Basic => {
                expect_zero(&elems[0][..VERSION_RANGE.start], "reserved header bytes set")?;
                let mut index = [[0u8; 32]; 3];
                let mut value = [[0u8; 32]; 4];
                index.copy_from_slice(&elems[1..4]);
                value.copy_from_slice(&elems[4..8]);
                Self::Basic(ClaimBasic { version, index, value })
            }
            ClaimType::AuthorizeKSign => {
                expect_zero(&elems[0][..VERSION_RANGE.start], "reserved header bytes set")?;
                expect_zero(&elems[1][..30], "reserved key bytes set")?;
                expect_zero(&elems[3], "reserved index element set")?;
                for elem in &elems[4..8] {
                    expect_zero(elem, "authorize ksign carries no value")?;
                }
                let key = SignKeypairPublic::from_algo_bytes(elems[1][30], elems[2])
                    .ok_or(Error::ClaimMalformed("unknown key algorithm"))?;
                let usage = KeyUsage::from_bits(elems[1][31])?;
                Self::AuthorizeKSign(ClaimAuthorizeKSign { version, key, usage })
            }
            ClaimType::SetRootKey => {
                expect_zero(&elems[0][..ERA_RANGE.start], "reserved header bytes set")?;
                expect_zero(&elems[1][..1], "reserved id byte set")?;
                expect_zero(&elems[2], "reserved index element set")?;
                expect_zero(&elems[3], "reserved index element set")?;
                for elem in &elems[5..8] {
                    expect_zero(elem, "reserved value element set")?;
                }
                let era = read_u32(&elems[0][ERA_RANGE]);
                let id = IdentityID::from_bytes(&elems[1][1..]).map_err(|_| Error::ClaimMalformed("bad identity id"))?;
                Self::SetRootKey(ClaimSetRootKey {
                    version,
                    era,
                    id,
                    root: Hash::new(elems[4]),
                })
            }
            ClaimType::AssignName => {
                expect_zero(&elems[0][..VERSION_RANGE.start], "reserved header bytes set")?;
                expect_zero(&elems[2], "reserved index element set")?;
                expect_zero(&elems[3], "reserved index element set")?;
                expect_zero(&elems[4][..1], "reserved id byte set")?;
                for elem in &elems[5..8] {
                    expect_zero(elem, "reserved value element set")?;
                }
                let id = IdentityID::from_bytes(&elems[4][1..]).map_err(|_| Error::ClaimMalformed("bad identity id"))?;
                Self::AssignName(ClaimAssignName {
                    version,
                    name_hash: Hash::new(elems[1]),
                    id,
                })
            }
        };
        Ok(claim)
    }
}

impl From<ClaimBasic> for Claim {
    fn from(c: ClaimBasic) -> Self {
        Self::Basic(c)
    }
}

impl From<ClaimAuthorizeKSign> for Claim {
    fn from(c: ClaimAuthorizeKSign) -> Self {
        Self::AuthorizeKSign(c)
    }
}

impl From<ClaimSetRootKey> for Claim {
    fn from(c: ClaimSetRootKey) -> Self {
        Self::SetRootKey(c)
    }
}

impl From<ClaimAssignName> for Claim {
    fn from(c: ClaimAssignName) -> Self {
        Self::AssignName(c)
    }
}

impl From<ClaimRevocation> for Claim {
    fn from(c: ClaimRevocation) -> Self {
        Self::Revocation(c)
    }
}

/// The same entry with its version bumped by one. Its HIndex is what a
/// non-revocation proof has to show is absent.
///
/// Works on raw entries so proofs can be checked without decoding the claim.
pub fn next_version(entry: &Entry) -> Result<Entry> {
    let mut next = *entry;
    let header = &mut next.elems_mut()[0];
    let version = read_u32(&header[VERSION_RANGE])
        .checked_add(1)
        .ok_or(Error::ClaimMalformed("version overflow"))?;
    header[VERSION_RANGE].copy_from_slice(&version.to_be_bytes());
    Ok(next)
}

/// The same entry one version back, or `None` at version 0. Only its index
/// half means anything: the previous version's value may differ.
pub fn prev_version(entry: &Entry) -> Option<Entry> {
    let mut prev = *entry;
    let header = &mut prev.elems_mut()[0];
    let version = read_u32(&header[VERSION_RANGE]).checked_sub(1)?;
    header[VERSION_RANGE].copy_from_slice(&version.to_be_bytes());
    Some(prev)
}

fn write_header(elem: &mut ElemBytes, ty: ClaimType, version: u32) {
    elem[TYPE_RANGE].copy_from_slice(&(ty as u64).to_be_bytes());
    elem[VERSION_RANGE].copy_from_slice(&version.to_be_bytes());
}

fn read_header(elem: &ElemBytes) -> Result<(ClaimType, u32)> {
    let mut ty_bytes = [0u8; 8];
    ty_bytes.copy_from_slice(&elem[TYPE_RANGE]);
    let ty = ClaimType::try_from(u64::from_be_bytes(ty_bytes))?;
    Ok((ty, read_u32(&elem[VERSION_RANGE])))
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(arr)
}

fn expect_zero(bytes: &[u8], what: &'static str) -> Result<()> {
    if bytes.iter().any(|b| *b != 0) {
        return Err(Error::ClaimMalformed(what));
    }
    Ok(())
}
