//! Single-use challenges for identity assertions.
//!
//! A verifier hands out a nonce scoped to an origin, the holder of an identity
//! signs it back, and the verifier consumes it. Issue, consume and sweep all go
//! through one lock, so a nonce is removed exactly once no matter who races.

use crate::{
    error::{Error, Result},
    util::{self, ser, ser::serde_via_string, Timestamp},
};
use rand::{rngs::OsRng, CryptoRng, RngCore};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use subtle::ConstantTimeEq;
use tokio::sync::watch;
use tracing::{debug, info};

const NONCE_BYTES: usize = 32;

/// A random challenge value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Nonce([u8; NONCE_BYTES]);

impl Nonce {
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; NONCE_BYTES];
        rng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_BYTES] {
        &self.0
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", ser::base64_encode(self.0))
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({})", self)
    }
}

impl FromStr for Nonce {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        let bytes = ser::base64_decode(s)?;
        Ok(Self(bytes.as_slice().try_into().map_err(|_| Error::BadLength)?))
    }
}

serde_via_string!(Nonce);

#[derive(Debug, Clone)]
struct Outstanding {
    origin: String,
    expires: Timestamp,
}

/// Outstanding nonces, keyed by value.
#[derive(Debug, Default)]
pub struct NonceDb {
    nonces: Mutex<HashMap<Nonce, Outstanding>>,
}

impl NonceDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a nonce for `origin` that expires `ttl` seconds from now.
    pub fn issue(&self, origin: &str, ttl: u64) -> Nonce {
        self.issue_with(&mut OsRng, origin, ttl, Timestamp::now())
    }

    pub(crate) fn issue_with<R: RngCore + CryptoRng>(&self, rng: &mut R, origin: &str, ttl: u64, now: Timestamp) -> Nonce {
        let nonce = Nonce::random(rng);
        let outstanding = Outstanding {
            origin: origin.to_string(),
            expires: now.add_secs(ttl),
        };
        util::lock(&self.nonces).insert(nonce, outstanding);
        debug!(origin, ttl, "nonce issued");
        nonce
    }

    /// Check `nonce` against `origin` and remove it. Expired nonces are
    /// removed on the way out; a nonce presented with the wrong origin stays
    /// put for its rightful owner.
    pub fn take(&self, nonce: &Nonce, origin: &str) -> Result<()> {
        self.take_at(nonce, origin, Timestamp::now())
    }

    pub(crate) fn take_at(&self, nonce: &Nonce, origin: &str, now: Timestamp) -> Result<()> {
        let mut nonces = util::lock(&self.nonces);
        check(&mut nonces, nonce, origin, now)?;
        nonces.remove(nonce);
        debug!(origin, "nonce consumed");
        Ok(())
    }

    /// Same checks as `take_at`, but a nonce that passes stays outstanding.
    pub(crate) fn check_at(&self, nonce: &Nonce, origin: &str, now: Timestamp) -> Result<()> {
        check(&mut util::lock(&self.nonces), nonce, origin, now)
    }

    /// Atomic check-and-remove. True only for the one caller that removed it.
    pub fn consume(&self, nonce: &Nonce, origin: &str) -> bool {
        self.take(nonce, origin).is_ok()
    }

    /// Drop every nonce that has expired by `now`. Returns how many went.
    pub fn sweep(&self, now: Timestamp) -> usize {
        let mut nonces = util::lock(&self.nonces);
        let before = nonces.len();
        nonces.retain(|_, outstanding| outstanding.expires > now);
        before - nonces.len()
    }

    pub fn len(&self) -> usize {
        util::lock(&self.nonces).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sweep on an interval until `shutdown` flips.
    pub async fn run(&self, every: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(every);
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
                _ = tick.tick() => {
                    let swept = self.sweep(Timestamp::now());
                    if swept > 0 {
                        debug!(swept, "expired nonces swept");
                    }
                }
            }
        }
        info!("nonce sweeper stopped");
    }
}

/// Expired nonces are dropped here; anything else is left for the caller.
fn check(nonces: &mut HashMap<Nonce, Outstanding>, nonce: &Nonce, origin: &str, now: Timestamp) -> Result<()> {
    let outstanding = nonces.get(nonce).ok_or(Error::NonceUnknown)?;
    if outstanding.expires <= now {
        nonces.remove(nonce);
        return Err(Error::NonceExpired);
    }
    if !bool::from(outstanding.origin.as_bytes().ct_eq(origin.as_bytes())) {
        return Err(Error::NonceOriginMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::test;
    use std::sync::Arc;

    #[test]
    fn single_use() {
        let db = NonceDb::new();
        let nonce = db.issue("example.com", 60);
        assert!(db.consume(&nonce, "example.com"));
        assert!(!db.consume(&nonce, "example.com"));
        assert_eq!(db.take(&nonce, "example.com"), Err(Error::NonceUnknown));
    }

    #[test]
    fn origin_is_checked_and_nonce_kept() {
        let db = NonceDb::new();
        let nonce = db.issue("example.com", 60);
        assert_eq!(db.take(&nonce, "evil.com"), Err(Error::NonceOriginMismatch));
        assert_eq!(db.take(&nonce, "example.co"), Err(Error::NonceOriginMismatch));
        assert_eq!(db.take(&nonce, "example.com"), Ok(()));
    }

    #[test]
    fn expiry() {
        let mut rng = test::rng();
        let db = NonceDb::new();
        let now = Timestamp::from_unix(1_700_000_000);
        let nonce = db.issue_with(&mut rng, "example.com", 10, now);
        assert_eq!(db.take_at(&nonce, "example.com", now.add_secs(10)), Err(Error::NonceExpired));
        // gone after the failed attempt
        assert_eq!(db.take_at(&nonce, "example.com", now), Err(Error::NonceUnknown));
    }

    #[test]
    fn check_leaves_nonce_outstanding() {
        let mut rng = test::rng();
        let db = NonceDb::new();
        let now = Timestamp::from_unix(1_700_000_000);
        let nonce = db.issue_with(&mut rng, "example.com", 10, now);
        assert_eq!(db.check_at(&nonce, "example.com", now), Ok(()));
        assert_eq!(db.check_at(&nonce, "evil.com", now), Err(Error::NonceOriginMismatch));
        assert_eq!(db.len(), 1);
        assert_eq!(db.take_at(&nonce, "example.com", now), Ok(()));
        assert_eq!(db.check_at(&nonce, "example.com", now), Err(Error::NonceUnknown));

        let late = db.issue_with(&mut rng, "example.com", 10, now);
        assert_eq!(db.check_at(&late, "example.com", now.add_secs(10)), Err(Error::NonceExpired));
        assert!(db.is_empty());
    }

    #[test]
    fn sweep_drops_only_expired() {
        let mut rng = test::rng();
        let db = NonceDb::new();
        let now = Timestamp::from_unix(1_700_000_000);
        let short = db.issue_with(&mut rng, "a", 5, now);
        let long = db.issue_with(&mut rng, "b", 500, now);
        assert_eq!(db.sweep(now.add_secs(1)), 0);
        assert_eq!(db.sweep(now.add_secs(5)), 1);
        assert_eq!(db.len(), 1);
        assert_eq!(db.take_at(&short, "a", now), Err(Error::NonceUnknown));
        assert_eq!(db.take_at(&long, "b", now.add_secs(6)), Ok(()));
        assert!(db.is_empty());
    }

    #[test]
    fn text_form() {
        let nonce = Nonce::random(&mut test::rng());
        let text = nonce.to_string();
        assert_eq!(text.parse::<Nonce>().unwrap(), nonce);
        assert_eq!("c2hvcnQ".parse::<Nonce>(), Err(Error::BadLength));
    }

    #[test]
    fn concurrent_consumers_race_for_one_win() {
        let db = Arc::new(NonceDb::new());
        let nonce = db.issue("example.com", 60);
        let handles = (0..8)
            .map(|_| {
                let db = db.clone();
                std::thread::spawn(move || db.consume(&nonce, "example.com"))
            })
            .collect::<Vec<_>>();
        let wins = handles.into_iter().map(|h| h.join().unwrap()).filter(|won| *won).count();
        assert_eq!(wins, 1);
    }

    #[tokio::test]
    async fn sweeper_stops_on_shutdown() {
        let db = Arc::new(NonceDb::new());
        let (tx, rx) = watch::channel(false);
        let task = {
            let db = db.clone();
            tokio::spawn(async move { db.run(Duration::from_millis(5), rx).await })
        };
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
    }
}
