//! Signed packets: typed, expiring, signed envelopes an identity uses to assert
//! something to a relying party.
//!
//! On the wire a packet is three URL-safe base64 segments joined with dots:
//!
//! ```text
//! base64(header json) . base64(payload json) . base64(signature)
//! ```
//!
//! The signature covers the first two segments exactly as they appear. The
//! header names the issuer, when the packet was made, how long it lives, and
//! carries the proof that the signing key is authorized for the issuer. The
//! payload is one of a closed set of types, picked by the header's `typ`.
//!
//! Decoding is strict. An unknown `typ` is an error, never a fallback, and a
//! segment that doesn't re-encode to the same bytes is rejected, so there is
//! exactly one encoding of any given packet.

use crate::{
    claim::ProofClaim,
    crypto::sign_key::SignKeypairSignature,
    error::{Error, Result},
    identity::IdentityID,
    util::{ser, ser::serde_via_string, Timestamp},
};
use serde::de::DeserializeOwned;
use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

pub mod discovery;
pub mod nonce;
mod signer;
mod verifier;

pub use signer::SignedPacketSigner;
pub use verifier::{SignedPacketVerifier, VerifiedPacket, VerifyOptions};

use nonce::{Nonce, NonceDb};

/// The kinds of packet we know how to sign and verify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    GenericSig,
    NameAssert,
    IdenAssert,
}

impl PacketType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GenericSig => "generic_sig_v01",
            Self::NameAssert => "name_assert_v01",
            Self::IdenAssert => "iden_assert_v01",
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PacketType {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "generic_sig_v01" => Ok(Self::GenericSig),
            "name_assert_v01" => Ok(Self::NameAssert),
            "iden_assert_v01" => Ok(Self::IdenAssert),
            _ => Err(Error::PacketUnknownType(s.to_string())),
        }
    }
}

serde_via_string!(PacketType);

/// The part of a packet that says who, when, and with what key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters, getset::CopyGetters)]
pub struct PacketHeader {
    #[getset(get_copy = "pub")]
    typ: PacketType,
    /// The identity making the assertion.
    #[getset(get_copy = "pub")]
    iss: IdentityID,
    /// Issued at, in unix seconds.
    #[getset(get_copy = "pub")]
    iat: i64,
    /// Seconds after `iat` the packet stays valid.
    #[getset(get_copy = "pub")]
    ttl: u64,
    /// Proof that the signing key is an operational key of `iss`.
    #[getset(get = "pub")]
    ksign: ProofClaim,
}

impl PacketHeader {
    pub fn new(typ: PacketType, iss: IdentityID, iat: i64, ttl: u64, ksign: ProofClaim) -> Self {
        Self { typ, iss, iat, ttl, ksign }
    }

    /// When the packet stops being valid.
    pub fn expires(&self) -> Timestamp {
        Timestamp::from_unix(self.iat).add_secs(self.ttl)
    }
}

/// A bag of key/value pairs. Ordered, so it encodes the same way every time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
pub struct PayloadGeneric {
    form: BTreeMap<String, String>,
}

impl PayloadGeneric {
    pub fn new(form: BTreeMap<String, String>) -> Self {
        Self { form }
    }
}

/// "I own this name", with the relay's proof of the name assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
pub struct PayloadNameAssert {
    name: String,
    proof_assign_name: ProofClaim,
}

impl PayloadNameAssert {
    pub fn new<T: Into<String>>(name: T, proof_assign_name: ProofClaim) -> Self {
        Self {
            name: name.into(),
            proof_assign_name,
        }
    }
}

/// A challenge issued by a verifier: a nonce scoped to the verifier's origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters, getset::CopyGetters)]
pub struct RequestIdenAssert {
    #[getset(get_copy = "pub")]
    nonce: Nonce,
    #[getset(get = "pub")]
    origin: String,
}

impl RequestIdenAssert {
    /// Issue a fresh challenge for `origin` from the verifier's nonce db.
    pub fn new(nonce_db: &NonceDb, origin: &str, ttl: u64) -> Self {
        Self {
            nonce: nonce_db.issue(origin, ttl),
            origin: origin.to_string(),
        }
    }
}

/// The answer to a [`RequestIdenAssert`], optionally asserting a name too.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
pub struct PayloadIdenAssert {
    request: RequestIdenAssert,
    form: Option<PayloadNameAssert>,
}

impl PayloadIdenAssert {
    pub fn new(request: RequestIdenAssert, form: Option<PayloadNameAssert>) -> Self {
        Self { request, form }
    }
}

/// Everything a packet can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Generic(PayloadGeneric),
    NameAssert(PayloadNameAssert),
    IdenAssert(PayloadIdenAssert),
}

impl Payload {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Generic(_) => PacketType::GenericSig,
            Self::NameAssert(_) => PacketType::NameAssert,
            Self::IdenAssert(_) => PacketType::IdenAssert,
        }
    }

    /// The name this payload asserts, if any.
    pub fn name(&self) -> Option<&PayloadNameAssert> {
        match self {
            Self::Generic(_) => None,
            Self::NameAssert(assert) => Some(assert),
            Self::IdenAssert(assert) => assert.form.as_ref(),
        }
    }

    fn to_json(&self) -> Result<Vec<u8>> {
        match self {
            Self::Generic(payload) => ser::serialize_json(payload),
            Self::NameAssert(payload) => ser::serialize_json(payload),
            Self::IdenAssert(payload) => ser::serialize_json(payload),
        }
    }

    fn from_json(typ: PacketType, bytes: &[u8]) -> Result<Self> {
        Ok(match typ {
            PacketType::GenericSig => Self::Generic(decode_segment(bytes)?),
            PacketType::NameAssert => Self::NameAssert(decode_segment(bytes)?),
            PacketType::IdenAssert => Self::IdenAssert(decode_segment(bytes)?),
        })
    }
}

impl From<PayloadGeneric> for Payload {
    fn from(payload: PayloadGeneric) -> Self {
        Self::Generic(payload)
    }
}

impl From<PayloadNameAssert> for Payload {
    fn from(payload: PayloadNameAssert) -> Self {
        Self::NameAssert(payload)
    }
}

impl From<PayloadIdenAssert> for Payload {
    fn from(payload: PayloadIdenAssert) -> Self {
        Self::IdenAssert(payload)
    }
}

/// Decode a json segment, insisting that it is the canonical encoding of
/// what it decodes to.
fn decode_segment<T: serde::Serialize + DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    let val: T = ser::deserialize_json(bytes).map_err(|_| Error::PacketMalformed("bad json segment"))?;
    if ser::serialize_json(&val)? != bytes {
        return Err(Error::PacketMalformed("non-canonical segment"));
    }
    Ok(val)
}

#[derive(Deserialize)]
struct TypeProbe {
    typ: String,
}

/// A signed, typed, expiring envelope.
#[derive(Debug, Clone, PartialEq, getset::Getters)]
#[getset(get = "pub")]
pub struct SignedPacket {
    header: PacketHeader,
    payload: Payload,
    signature: SignKeypairSignature,
}

impl SignedPacket {
    /// Build a packet from its parts, signing with `sign_fn`, which gets the
    /// exact bytes the signature must cover.
    pub fn create<F>(header: PacketHeader, payload: Payload, sign_fn: F) -> Result<Self>
    where
        F: FnOnce(&[u8]) -> Result<SignKeypairSignature>,
    {
        if header.typ != payload.packet_type() {
            return Err(Error::PacketMalformed("header type does not match payload"));
        }
        let signature = sign_fn(Self::signing_input(&header, &payload)?.as_bytes())?;
        Ok(Self {
            header,
            payload,
            signature,
        })
    }

    fn signing_input(header: &PacketHeader, payload: &Payload) -> Result<String> {
        Ok(format!(
            "{}.{}",
            ser::base64_encode(ser::serialize_json(header)?),
            ser::base64_encode(payload.to_json()?)
        ))
    }

    /// The bytes the signature covers.
    pub fn signed_bytes(&self) -> Result<Vec<u8>> {
        Ok(Self::signing_input(&self.header, &self.payload)?.into_bytes())
    }

    /// Encode to the dotted text form.
    pub fn marshal(&self) -> Result<String> {
        Ok(format!(
            "{}.{}",
            Self::signing_input(&self.header, &self.payload)?,
            ser::base64_encode(self.signature)
        ))
    }

    /// Decode the dotted text form. Fails on unknown packet types and on
    /// anything that isn't in canonical form.
    pub fn unmarshal(packet: &str) -> Result<Self> {
        let segments = packet.split('.').collect::<Vec<_>>();
        let &[header_b64, payload_b64, sig_b64] = segments.as_slice() else {
            return Err(Error::PacketMalformed("expected three segments"));
        };
        let header_bytes = ser::base64_decode(header_b64).map_err(|_| Error::PacketMalformed("bad header encoding"))?;
        let payload_bytes = ser::base64_decode(payload_b64).map_err(|_| Error::PacketMalformed("bad payload encoding"))?;
        let sig_bytes = ser::base64_decode(sig_b64).map_err(|_| Error::PacketMalformed("bad signature encoding"))?;

        // find out what we're looking at before decoding the rest, so an
        // unknown type reports as such
        let probe: TypeProbe =
            ser::deserialize_json(&header_bytes).map_err(|_| Error::PacketMalformed("bad header json"))?;
        let typ = probe.typ.parse::<PacketType>()?;

        let header: PacketHeader = decode_segment(&header_bytes)?;
        let payload = Payload::from_json(typ, &payload_bytes)?;
        let signature =
            SignKeypairSignature::from_bytes(&sig_bytes).map_err(|_| Error::PacketMalformed("bad signature length"))?;
        if ser::base64_encode(&sig_bytes) != sig_b64 {
            return Err(Error::PacketMalformed("non-canonical segment"));
        }
        Ok(Self {
            header,
            payload,
            signature,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::{
        claim::{Claim, ClaimAuthorizeKSign, ClaimSetRootKey, KeyUsage, ProofClaimPartial, SetRootAux},
        crypto::sign_key::SignKeypair,
        merkle::{MemStorage, MerkleTree},
        util::test,
    };
    use std::sync::Arc;

    /// A self-contained ksign proof for `key` under a fake identity, plus the
    /// relay root it ends at.
    pub(crate) fn ksign_proof(key: &SignKeypair, id: IdentityID) -> ProofClaim {
        let claim: Claim = ClaimAuthorizeKSign::new(0, key.public(), KeyUsage::OPERATIONAL).into();
        let leaf = claim.entry();
        let mut id_tree = MerkleTree::new(Arc::new(MemStorage::new()), 140).unwrap();
        id_tree.insert(&leaf).unwrap();
        let srk = Claim::from(ClaimSetRootKey::new(0, 0, id, id_tree.root())).entry();
        let mut relay_tree = MerkleTree::new(Arc::new(MemStorage::new()), 140).unwrap();
        relay_tree.insert(&srk).unwrap();
        let next = |e: &crate::claim::Entry| crate::claim::next_version(e).unwrap().hindex();
        ProofClaim::new(
            leaf,
            vec![
                ProofClaimPartial::new(
                    id_tree.prove_non_existence(&next(&leaf)).unwrap(),
                    id_tree.prove_existence(&leaf.hindex()).unwrap(),
                    id_tree.root(),
                    Some(SetRootAux { version: 0, era: 0, id }),
                ),
                ProofClaimPartial::new(
                    relay_tree.prove_non_existence(&next(&srk)).unwrap(),
                    relay_tree.prove_existence(&srk.hindex()).unwrap(),
                    relay_tree.root(),
                    None,
                ),
            ],
            Timestamp::from_unix(1_700_000_000),
            true,
        )
    }

    fn generic_packet() -> (SignKeypair, SignedPacket) {
        let key = SignKeypair::new_ed25519(&mut test::rng());
        let id = test::fake_id(5);
        let header = PacketHeader::new(PacketType::GenericSig, id, 1_700_000_000, 600, ksign_proof(&key, id));
        let form = BTreeMap::from([("foo".to_string(), "baz".to_string())]);
        let packet = SignedPacket::create(header, PayloadGeneric::new(form).into(), |msg| Ok(key.sign(msg))).unwrap();
        (key, packet)
    }

    fn segments(packet: &str) -> Vec<Vec<u8>> {
        packet.split('.').map(|s| ser::base64_decode(s).unwrap()).collect()
    }

    fn join(segs: &[Vec<u8>]) -> String {
        segs.iter().map(ser::base64_encode).collect::<Vec<_>>().join(".")
    }

    #[test]
    fn marshal_unmarshal() {
        let (key, packet) = generic_packet();
        let text = packet.marshal().unwrap();
        assert_eq!(text.split('.').count(), 3);
        let parsed = SignedPacket::unmarshal(&text).unwrap();
        assert_eq!(parsed, packet);
        assert_eq!(parsed.marshal().unwrap(), text);
        assert!(key.verify(parsed.signature(), &parsed.signed_bytes().unwrap()).is_ok());

        let header = String::from_utf8(segments(&text)[0].clone()).unwrap();
        assert!(header.starts_with(r#"{"typ":"generic_sig_v01","iss":""#));
        let payload = String::from_utf8(segments(&text)[1].clone()).unwrap();
        assert_eq!(payload, r#"{"form":{"foo":"baz"}}"#);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let (_, packet) = generic_packet();
        let mut segs = segments(&packet.marshal().unwrap());
        let header = String::from_utf8(segs[0].clone()).unwrap().replace("generic_sig_v01", "generic_sig_v99");
        segs[0] = header.into_bytes();
        assert_eq!(
            SignedPacket::unmarshal(&join(&segs)),
            Err(Error::PacketUnknownType("generic_sig_v99".into()))
        );
    }

    #[test]
    fn non_canonical_is_rejected() {
        let (_, packet) = generic_packet();
        let segs = segments(&packet.marshal().unwrap());

        let mut spaced = segs.clone();
        spaced[1] = br#"{"form": {"foo":"baz"}}"#.to_vec();
        assert_eq!(
            SignedPacket::unmarshal(&join(&spaced)),
            Err(Error::PacketMalformed("non-canonical segment"))
        );

        let mut extra = segs.clone();
        extra[1] = br#"{"form":{"foo":"baz"},"admin":"true"}"#.to_vec();
        assert_eq!(
            SignedPacket::unmarshal(&join(&extra)),
            Err(Error::PacketMalformed("non-canonical segment"))
        );

        let mut wrong_shape = segs.clone();
        wrong_shape[1] = br#"{"name":"example.com"}"#.to_vec();
        assert_eq!(SignedPacket::unmarshal(&join(&wrong_shape)), Err(Error::PacketMalformed("bad json segment")));

        assert_eq!(
            SignedPacket::unmarshal(&join(&segs[..2])),
            Err(Error::PacketMalformed("expected three segments"))
        );
        assert_eq!(
            SignedPacket::unmarshal("a.b.c.d"),
            Err(Error::PacketMalformed("expected three segments"))
        );
    }

    #[test]
    fn header_type_must_match_payload() {
        let key = SignKeypair::new_ed25519(&mut test::rng());
        let id = test::fake_id(5);
        let header = PacketHeader::new(PacketType::NameAssert, id, 0, 600, ksign_proof(&key, id));
        let res = SignedPacket::create(header, PayloadGeneric::new(BTreeMap::new()).into(), |msg| Ok(key.sign(msg)));
        assert_eq!(res, Err(Error::PacketMalformed("header type does not match payload")));
    }

    #[test]
    fn iden_assert_payload_shape() {
        let db = NonceDb::new();
        let request = RequestIdenAssert::new(&db, "example.com", 60);
        let payload = Payload::from(PayloadIdenAssert::new(request.clone(), None));
        let json = String::from_utf8(payload.to_json().unwrap()).unwrap();
        assert_eq!(
            json,
            format!(r#"{{"request":{{"nonce":"{}","origin":"example.com"}},"form":null}}"#, request.nonce())
        );
        assert_eq!(Payload::from_json(PacketType::IdenAssert, json.as_bytes()).unwrap(), payload);
        assert_eq!(db.len(), 1);
    }
}
