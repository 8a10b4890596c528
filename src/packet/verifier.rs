use crate::{
    claim::{Claim, KeyUsage, ProofClaim, IDENTITY_CLAIM_LEVELS, RELAY_CLAIM_LEVELS},
    crypto::hash::Hash,
    error::{Error, Result},
    identity::IdentityID,
    packet::{
        discovery::{Discovery, NameResolver},
        nonce::NonceDb,
        Payload, PayloadNameAssert, SignedPacket,
    },
    publisher::RootAnchor,
    util::Timestamp,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Per-call knobs for [`SignedPacketVerifier::verify`].
#[derive(Default, Clone, Copy)]
pub struct VerifyOptions<'a> {
    /// Where identity assertion nonces get consumed. Identity assertions fail
    /// without one.
    pub nonce_db: Option<&'a NonceDb>,
    /// The origin we expect identity assertions to have been issued for.
    pub origin: Option<&'a str>,
    /// Reject issuers that discovery doesn't trust.
    pub require_trusted: bool,
    /// Check proofs against this root instead of the published ones.
    pub root: Option<Hash>,
}

/// What a successful verification tells you.
#[derive(Debug, Clone, PartialEq, getset::Getters, getset::CopyGetters)]
pub struct VerifiedPacket {
    #[getset(get_copy = "pub")]
    issuer: IdentityID,
    /// The asserted name, once it has been checked against the issuer.
    #[getset(get = "pub")]
    name: Option<String>,
    #[getset(get = "pub")]
    payload: Payload,
    #[getset(get_copy = "pub")]
    issued_at: Timestamp,
}

impl VerifiedPacket {
    /// The form of a generic packet.
    pub fn form(&self) -> Option<&BTreeMap<String, String>> {
        match &self.payload {
            Payload::Generic(generic) => Some(generic.form()),
            _ => None,
        }
    }
}

fn fail(check: &'static str, err: Error) -> Error {
    debug!(check, error = %err, "packet verification failed");
    err
}

/// Checks signed packets, in order: expiry, key proof, key authorization,
/// signature, payload-specific checks (name, nonce), then trust. The first
/// failure wins and names the check that failed. A nonce is only used up
/// once every check has passed.
pub struct SignedPacketVerifier {
    anchor: Arc<dyn RootAnchor>,
    discovery: Arc<dyn Discovery>,
    names: Arc<dyn NameResolver>,
    /// Seconds a published root stays good for once it's no longer the
    /// latest.
    max_root_age: u64,
}

impl SignedPacketVerifier {
    pub fn new(
        anchor: Arc<dyn RootAnchor>,
        discovery: Arc<dyn Discovery>,
        names: Arc<dyn NameResolver>,
        max_root_age: u64,
    ) -> Self {
        Self {
            anchor,
            discovery,
            names,
            max_root_age,
        }
    }

    /// Decode and verify a packet in text form.
    pub fn verify_str(&self, packet: &str, opts: &VerifyOptions<'_>) -> Result<VerifiedPacket> {
        let packet = SignedPacket::unmarshal(packet).map_err(|e| fail("decode", e))?;
        self.verify(&packet, opts)
    }

    pub fn verify(&self, packet: &SignedPacket, opts: &VerifyOptions<'_>) -> Result<VerifiedPacket> {
        self.verify_at(packet, opts, Timestamp::now())
    }

    /// Verify as though it were `now`.
    pub fn verify_at(&self, packet: &SignedPacket, opts: &VerifyOptions<'_>, now: Timestamp) -> Result<VerifiedPacket> {
        let header = packet.header();
        let iss = header.iss();

        if header.expires() < now {
            return Err(fail("expiry", Error::PacketExpired));
        }

        self.check_proof(header.ksign(), IDENTITY_CLAIM_LEVELS, opts, now)
            .map_err(|e| fail("ksign proof", e))?;

        let key = match header.ksign().claim() {
            Ok(Claim::AuthorizeKSign(ksign))
                if ksign.usage().contains(KeyUsage::OPERATIONAL) && header.ksign().identity() == Some(iss) =>
            {
                ksign.key()
            }
            _ => return Err(fail("key authorization", Error::PacketKeyNotAuthorized)),
        };

        key.verify(packet.signature(), &packet.signed_bytes()?)
            .map_err(|_| fail("signature", Error::PacketInvalidSignature))?;

        let name = match packet.payload().name() {
            Some(assert) => Some(self.check_name(assert, iss, opts, now).map_err(|e| fail("name", e))?),
            None => None,
        };

        let nonce = match packet.payload() {
            Payload::IdenAssert(assert) => {
                let request = assert.request();
                if let Some(origin) = opts.origin {
                    if origin != request.origin() {
                        return Err(fail("nonce", Error::NonceOriginMismatch));
                    }
                }
                let nonce_db = opts.nonce_db.ok_or_else(|| fail("nonce", Error::NonceUnknown))?;
                nonce_db
                    .check_at(&request.nonce(), request.origin(), now)
                    .map_err(|e| fail("nonce", e))?;
                Some((nonce_db, request))
            }
            _ => None,
        };

        if opts.require_trusted && !self.discovery.is_trusted(&iss) {
            return Err(fail("trust", Error::PacketUntrustedIssuer));
        }

        if let Some((nonce_db, request)) = nonce {
            // someone else may have taken it since the check
            nonce_db
                .take_at(&request.nonce(), request.origin(), now)
                .map_err(|e| fail("nonce", e))?;
        }

        debug!(typ = %header.typ(), iss = %iss, "packet verified");
        Ok(VerifiedPacket {
            issuer: iss,
            name,
            payload: packet.payload().clone(),
            issued_at: Timestamp::from_unix(header.iat()),
        })
    }

    /// The proof must have exactly `levels` levels, hold together, and end at
    /// a root we trust to be fresh.
    fn check_proof(&self, proof: &ProofClaim, levels: usize, opts: &VerifyOptions<'_>, now: Timestamp) -> Result<()> {
        if proof.proofs().len() != levels {
            return Err(Error::PacketInvalidProof);
        }
        proof.verify()?;
        let root = proof.root()?;
        if let Some(expected) = opts.root {
            return if root == expected { Ok(()) } else { Err(Error::PacketStaleRoot) };
        }
        let published = self.anchor.published_at(&root).ok_or(Error::PacketStaleRoot)?;
        let is_latest = self.anchor.last_published().map(|p| p.root()) == Some(root);
        if !is_latest && published.add_secs(self.max_root_age) < now {
            return Err(Error::PacketStaleRoot);
        }
        Ok(())
    }

    /// The name assignment has to be proven by the relay, name the issuer,
    /// and agree with the name resolver.
    fn check_name(
        &self,
        assert: &PayloadNameAssert,
        iss: IdentityID,
        opts: &VerifyOptions<'_>,
        now: Timestamp,
    ) -> Result<String> {
        self.check_proof(assert.proof_assign_name(), RELAY_CLAIM_LEVELS, opts, now)?;
        match assert.proof_assign_name().claim() {
            Ok(Claim::AssignName(claim)) if claim.is_name(assert.name()) && claim.id() == iss => {}
            _ => return Err(Error::PacketNameMismatch),
        }
        if self.names.resolve(assert.name()) != Some(iss) {
            return Err(Error::PacketNameMismatch);
        }
        Ok(assert.name().clone())
    }
}
