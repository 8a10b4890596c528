use crate::{
    claim::ProofClaim,
    crypto::keystore::{KeyHandle, KeyStore},
    error::Result,
    identity::IdentityID,
    packet::{
        PacketHeader, Payload, PayloadGeneric, PayloadIdenAssert, PayloadNameAssert, RequestIdenAssert, SignedPacket,
    },
    util::Timestamp,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Signs packets on behalf of one identity with one of its operational keys.
///
/// The signer trusts its caller to pair `key` with the proof that authorizes
/// it. Nothing here checks the pairing; a mismatched proof produces packets
/// that every verifier rejects.
#[derive(getset::Getters, getset::CopyGetters)]
pub struct SignedPacketSigner {
    key_store: Arc<KeyStore>,
    #[getset(get_copy = "pub")]
    key: KeyHandle,
    #[getset(get_copy = "pub")]
    id: IdentityID,
    #[getset(get = "pub")]
    proof_ksign: ProofClaim,
}

impl SignedPacketSigner {
    pub fn new(key_store: Arc<KeyStore>, key: KeyHandle, id: IdentityID, proof_ksign: ProofClaim) -> Self {
        Self {
            key_store,
            key,
            id,
            proof_ksign,
        }
    }

    /// Sign `payload`, valid for `ttl` seconds from now.
    pub fn sign(&self, payload: Payload, ttl: u64) -> Result<SignedPacket> {
        self.sign_at(payload, ttl, Timestamp::now())
    }

    /// Sign as though it were `now`.
    pub fn sign_at(&self, payload: Payload, ttl: u64, now: Timestamp) -> Result<SignedPacket> {
        let header = PacketHeader::new(payload.packet_type(), self.id, now.unix(), ttl, self.proof_ksign.clone());
        let packet = SignedPacket::create(header, payload, |msg| self.key_store.sign(&self.key, msg))?;
        debug!(typ = %packet.header().typ(), iss = %self.id, ttl, "packet signed");
        Ok(packet)
    }

    pub fn sign_generic(&self, form: BTreeMap<String, String>, ttl: u64) -> Result<SignedPacket> {
        self.sign(PayloadGeneric::new(form).into(), ttl)
    }

    pub fn sign_name_assert(&self, name: &str, proof_assign_name: ProofClaim, ttl: u64) -> Result<SignedPacket> {
        self.sign(PayloadNameAssert::new(name, proof_assign_name).into(), ttl)
    }

    /// Answer a verifier's challenge, optionally asserting a name along the
    /// way.
    pub fn sign_iden_assert(
        &self,
        request: RequestIdenAssert,
        name: Option<PayloadNameAssert>,
        ttl: u64,
    ) -> Result<SignedPacket> {
        self.sign(PayloadIdenAssert::new(request, name).into(), ttl)
    }
}
