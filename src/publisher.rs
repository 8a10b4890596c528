//! Getting the relay root onto the ledger.
//!
//! The claim store never waits on the ledger. It drops the latest root into a
//! watch channel via [`RootPublisher::request`] and goes back to work. A
//! background task ([`RootPublisher::run`]) picks up whatever the newest root
//! is, publishes it (retrying with backoff when the ledger is unhappy), and
//! records what was published and when. That record is the freshness anchor
//! for everyone verifying proofs: see [`RootAnchor`].

use crate::{
    config::PublisherConfig,
    crypto::hash::Hash,
    error::{Error, Result},
    util::{self, ser, Timestamp},
};
use async_trait::async_trait;
use serde_derive::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex, RwLock,
};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// What the ledger hands back for a published root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters)]
#[getset(get = "pub")]
pub struct Receipt {
    /// Transaction handle, in whatever format the ledger uses.
    tx: String,
}

impl Receipt {
    pub fn new<T: Into<String>>(tx: T) -> Self {
        Self { tx: tx.into() }
    }
}

/// The external ledger the relay commits its root to.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Commit a root.
    async fn publish(&self, root: &Hash) -> Result<Receipt>;

    /// The last root the ledger has on record, if any.
    async fn read_last(&self) -> Result<Option<Hash>>;
}

/// A ledger that lives in memory. Handy for tests and local setups, and it can
/// be told to fail so retry paths get exercised.
#[derive(Default)]
pub struct MemLedger {
    roots: Mutex<Vec<Hash>>,
    failures: AtomicUsize,
}

impl MemLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` publishes fail.
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Everything published so far, oldest first.
    pub fn roots(&self) -> Vec<Hash> {
        util::lock(&self.roots).clone()
    }
}

#[async_trait]
impl Ledger for MemLedger {
    async fn publish(&self, root: &Hash) -> Result<Receipt> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::PublishFailed(String::from("ledger unavailable")));
        }
        let mut roots = util::lock(&self.roots);
        roots.push(*root);
        let mut hasher = blake3::Hasher::new();
        hasher.update(root.as_bytes());
        hasher.update(&(roots.len() as u64).to_be_bytes());
        Ok(Receipt::new(ser::hex_encode(hasher.finalize().as_bytes())))
    }

    async fn read_last(&self) -> Result<Option<Hash>> {
        Ok(util::lock(&self.roots).last().copied())
    }
}

/// A root we know made it onto the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, getset::Getters, getset::CopyGetters)]
pub struct PublishedRoot {
    #[getset(get_copy = "pub")]
    root: Hash,
    /// When we saw it land.
    #[getset(get_copy = "pub")]
    date: Timestamp,
    /// `None` when we learned about the root by reading the ledger rather than
    /// publishing it ourselves.
    #[getset(get = "pub")]
    receipt: Option<Receipt>,
}

/// Answers "was this root published, and when?" for proof verification.
pub trait RootAnchor: Send + Sync {
    /// When `root` was published, if we know it was.
    fn published_at(&self, root: &Hash) -> Option<Timestamp>;

    /// The most recently published root.
    fn last_published(&self) -> Option<PublishedRoot>;
}

/// Commits relay roots to a [`Ledger`] and remembers what got published.
pub struct RootPublisher {
    ledger: Arc<dyn Ledger>,
    config: PublisherConfig,
    requested: watch::Sender<Hash>,
    history: RwLock<VecDeque<PublishedRoot>>,
}

impl RootPublisher {
    pub fn new(ledger: Arc<dyn Ledger>, config: PublisherConfig) -> Self {
        let (requested, _) = watch::channel(Hash::EMPTY);
        Self {
            ledger,
            config,
            requested,
            history: RwLock::new(VecDeque::new()),
        }
    }

    /// Ask for `root` to be published. Never blocks; if several requests pile
    /// up before the background task gets to them, only the newest is
    /// published.
    pub fn request(&self, root: Hash) {
        self.requested.send_replace(root);
        debug!(root = %root, "root publish requested");
    }

    /// The newest root anyone asked us to publish.
    pub fn requested(&self) -> Hash {
        *self.requested.borrow()
    }

    /// Publish `root` now. Returns `None` if it's already the last published
    /// root.
    pub async fn commit(&self, root: Hash) -> Result<Option<PublishedRoot>> {
        if self.last_published().map(|p| p.root) == Some(root) {
            debug!(root = %root, "root already published, skipping");
            return Ok(None);
        }
        let timeout = Duration::from_secs(self.config.timeout_secs());
        let receipt = tokio::time::timeout(timeout, self.ledger.publish(&root))
            .await
            .map_err(|_| Error::PublishFailed(String::from("publish timed out")))??;
        let published = PublishedRoot {
            root,
            date: Timestamp::now(),
            receipt: Some(receipt),
        };
        self.record(published.clone());
        info!(root = %root, tx = ?published.receipt.as_ref().map(|r| r.tx()), "root published");
        Ok(Some(published))
    }

    /// Sync with the ledger's view of the last root. Picks up roots published
    /// by someone else (or by us before a restart).
    pub async fn refresh(&self) -> Result<()> {
        let last = self.ledger.read_last().await?;
        if let Some(root) = last {
            if self.published_at(&root).is_none() {
                info!(root = %root, "learned of published root from ledger");
                self.record(PublishedRoot {
                    root,
                    date: Timestamp::now(),
                    receipt: None,
                });
            }
        }
        Ok(())
    }

    fn record(&self, published: PublishedRoot) {
        let mut history = util::write(&self.history);
        history.push_back(published);
        while history.len() > self.config.history().max(1) {
            history.pop_front();
        }
    }

    /// The background loop: publish whatever root was last requested, retrying
    /// with backoff, and refresh from the ledger on an interval. Exits once
    /// `shutdown` flips to true (or its sender goes away), after the attempt in
    /// flight finishes or times out.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut requested = self.requested.subscribe();
        let mut refresh = tokio::time::interval(Duration::from_secs(self.config.interval_secs().max(1)));
        let base = Duration::from_millis(self.config.retry_base_ms().max(1));
        let max = Duration::from_millis(self.config.retry_max_ms()).max(base);
        let mut backoff = base;
        info!("root publisher started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let root = *requested.borrow_and_update();
            if !root.is_empty() {
                if let Err(err) = self.commit(root).await {
                    warn!(root = %root, error = %err, retry_in = ?backoff, "root publish failed");
                    tokio::select! {
                        _ = tokio::time::sleep(backoff) => {}
                        res = shutdown.changed() => {
                            if res.is_err() {
                                break;
                            }
                        }
                    }
                    backoff = (backoff * 2).min(max);
                    // still pending, go around without waiting for a new request
                    continue;
                }
                backoff = base;
            }
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
                res = requested.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
                _ = refresh.tick() => {
                    if let Err(err) = self.refresh().await {
                        warn!(error = %err, "ledger refresh failed");
                    }
                }
            }
        }
        info!("root publisher stopped");
    }
}

impl RootAnchor for RootPublisher {
    fn published_at(&self, root: &Hash) -> Option<Timestamp> {
        util::read(&self.history).iter().rev().find(|p| &p.root == root).map(|p| p.date)
    }

    fn last_published(&self) -> Option<PublishedRoot> {
        util::read(&self.history).back().cloned()
    }
}
