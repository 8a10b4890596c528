//! The relay itself: every service, built once and passed around.
//!
//! A transport layer (HTTP, CLI, whatever) holds one [`Relay`] and maps each of
//! its requests onto one method here, passing results and errors through
//! untouched.

use crate::{
    claim::{Claim, ClaimAuthorizeKSign, ClaimRevocation, KeyUsage, ProofClaim},
    config::RelayConfig,
    crypto::{
        hash::Hash,
        keystore::{KeyHandle, KeyStore},
        sign_key::SignKeypairPublic,
    },
    error::{Error, Result},
    identity::IdentityID,
    merkle::Storage,
    packet::{
        discovery::Discovery, nonce::NonceDb, Payload, RequestIdenAssert, SignedPacketSigner, SignedPacketVerifier,
        VerifiedPacket, VerifyOptions,
    },
    publisher::{Ledger, PublishedRoot, RootAnchor, RootPublisher},
    store::ClaimStore,
    util,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{info, warn};

#[derive(getset::Getters)]
pub struct Relay {
    #[getset(get = "pub")]
    config: RelayConfig,
    #[getset(get = "pub")]
    key_store: Arc<KeyStore>,
    #[getset(get = "pub")]
    claims: Arc<ClaimStore>,
    #[getset(get = "pub")]
    publisher: Arc<RootPublisher>,
    #[getset(get = "pub")]
    nonces: Arc<NonceDb>,
    discovery: Arc<dyn Discovery>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Relay {
    pub fn new(
        config: RelayConfig,
        storage: Arc<dyn Storage>,
        ledger: Arc<dyn Ledger>,
        discovery: Arc<dyn Discovery>,
    ) -> Result<Self> {
        let publisher = Arc::new(RootPublisher::new(ledger, config.publisher().clone()));
        let claims = Arc::new(ClaimStore::new(storage, config.tree_depth(), publisher.clone())?);
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            key_store: Arc::new(KeyStore::new(config.keystore())),
            claims,
            publisher,
            nonces: Arc::new(NonceDb::new()),
            discovery,
            shutdown,
            tasks: Mutex::new(Vec::new()),
            config,
        })
    }

    /// Spawn the root publisher and the nonce sweeper. Needs a tokio runtime.
    pub fn start(&self) {
        let publisher = self.publisher.clone();
        let publisher_shutdown = self.shutdown.subscribe();
        let nonces = self.nonces.clone();
        let nonces_shutdown = self.shutdown.subscribe();
        let sweep_every = Duration::from_secs(self.config.nonce_sweep_secs().max(1));
        let mut tasks = util::lock(&self.tasks);
        tasks.push(tokio::spawn(async move { publisher.run(publisher_shutdown).await }));
        tasks.push(tokio::spawn(async move { nonces.run(sweep_every, nonces_shutdown).await }));
        info!(root = %self.get_root(), "relay started");
    }

    /// Tell the background tasks to stop and wait for them. A publish in
    /// flight gets to finish (or time out) first.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let tasks = std::mem::take(&mut *util::lock(&self.tasks));
        for task in tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "background task ended badly");
            }
        }
        info!("relay stopped");
    }

    /// Create an identity from its genesis keys.
    pub fn create_identity(
        &self,
        op: &SignKeypairPublic,
        rec: &SignKeypairPublic,
        rev: &SignKeypairPublic,
    ) -> Result<(IdentityID, ProofClaim)> {
        self.claims.genesis(op, rec, rev)
    }

    pub fn add_claim(&self, id: &IdentityID, claim: &Claim) -> Result<()> {
        self.claims.add_claim(id, claim)
    }

    /// Revoke one of an identity's claims. `key` has to be a current
    /// revocation key of the identity, unlocked in our key store.
    pub fn revoke_claim(&self, id: &IdentityID, hindex: &Hash, key: &KeyHandle) -> Result<ClaimRevocation> {
        let public = self.key_store.public(key)?;
        self.key_proof(id, public, KeyUsage::REVOCATION)?;
        if !self.key_store.is_unlocked(key) {
            return Err(Error::KeyStoreLocked);
        }
        self.claims.revoke_claim(id, hindex)
    }

    pub fn get_claim_proof(&self, id: &IdentityID, hindex: &Hash) -> Result<ProofClaim> {
        self.claims.proof_of_claim(id, hindex)
    }

    /// The current relay root, published or not.
    pub fn get_root(&self) -> Hash {
        self.claims.relay_root()
    }

    pub fn last_published(&self) -> Option<PublishedRoot> {
        self.publisher.last_published()
    }

    pub fn assign_name(&self, name: &str, id: &IdentityID) -> Result<ProofClaim> {
        self.claims.assign_name(name, id)
    }

    /// Publish the current relay root right now instead of waiting for the
    /// background task.
    pub async fn commit_root(&self) -> Result<Option<PublishedRoot>> {
        self.publisher.commit(self.get_root()).await
    }

    /// Challenge someone to prove who they are.
    pub fn issue_nonce(&self, origin: &str, ttl: u64) -> RequestIdenAssert {
        RequestIdenAssert::new(&self.nonces, origin, ttl)
    }

    /// A signer for `id` using `key` from our key store. The key has to be an
    /// operational key of the identity that hasn't been revoked.
    pub fn signer(&self, id: &IdentityID, key: &KeyHandle) -> Result<SignedPacketSigner> {
        let public = self.key_store.public(key)?;
        let proof = self.key_proof(id, public, KeyUsage::OPERATIONAL)?;
        Ok(SignedPacketSigner::new(self.key_store.clone(), *key, *id, proof))
    }

    /// Proof of the newest current AuthorizeKSign claim of `id` for `public`
    /// that grants `usage`.
    fn key_proof(&self, id: &IdentityID, public: SignKeypairPublic, usage: KeyUsage) -> Result<ProofClaim> {
        let mut candidates = self
            .claims
            .claims(id)?
            .into_iter()
            .filter_map(|claim| match claim {
                Claim::AuthorizeKSign(ksign) if ksign.key() == public && ksign.usage().contains(usage) => Some(ksign),
                _ => None,
            })
            .collect::<Vec<ClaimAuthorizeKSign>>();
        candidates.sort_by_key(|ksign| std::cmp::Reverse(ksign.version()));
        for ksign in candidates {
            match self.claims.proof_of_claim(id, &Claim::from(ksign).hindex()) {
                Ok(proof) => return Ok(proof),
                Err(Error::ClaimRevoked) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(Error::PacketKeyNotAuthorized)
    }

    /// Sign a payload and return it in text form.
    pub fn sign_packet(&self, id: &IdentityID, key: &KeyHandle, payload: Payload, ttl: u64) -> Result<String> {
        self.signer(id, key)?.sign(payload, ttl)?.marshal()
    }

    /// A verifier that checks proofs against our published roots and names
    /// against our relay tree.
    pub fn verifier(&self) -> SignedPacketVerifier {
        SignedPacketVerifier::new(
            self.publisher.clone(),
            self.discovery.clone(),
            self.claims.clone(),
            self.config.max_root_age_secs(),
        )
    }

    /// Verify a packet in text form, consuming identity assertion nonces from
    /// our own nonce db.
    pub fn verify_packet(&self, packet: &str, origin: Option<&str>, require_trusted: bool) -> Result<VerifiedPacket> {
        let opts = VerifyOptions {
            nonce_db: Some(&self.nonces),
            origin,
            require_trusted,
            root: None,
        };
        self.verifier().verify_str(packet, &opts)
    }
}
