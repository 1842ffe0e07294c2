use std::time::{Duration, SystemTime};

use bytes::{BufMut, Bytes, BytesMut};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha1::Sha1;

use crate::error::{Error, Result};

type HmacSha1 = Hmac<Sha1>;

pub(crate) const COOKIE_TIMESTAMP_LENGTH: usize = 4;
pub(crate) const COOKIE_HMAC_LENGTH: usize = 20;
pub(crate) const COOKIE_LENGTH: usize = COOKIE_TIMESTAMP_LENGTH + COOKIE_HMAC_LENGTH;

/// How long an issued cookie stays acceptable. A timestamp dated in the
/// future is rejected outright.
pub(crate) const COOKIE_LIFETIME: Duration = Duration::from_secs(60);

/// Issues and verifies the State Cookie carried in INIT-ACK and echoed in
/// COOKIE-ECHO: a 4-byte big-endian seconds-since-epoch timestamp followed
/// by an HMAC-SHA1 over that timestamp (24 bytes total).
///
/// The key is generated per association, so the passive side can stay
/// stateless between INIT and COOKIE-ECHO: everything needed to validate
/// the echo is in the cookie itself.
#[derive(Debug, Clone)]
pub(crate) struct CookieIssuer {
    key: [u8; 16],
}

impl CookieIssuer {
    pub(crate) fn new() -> Self {
        let mut key = [0u8; 16];
        rand::thread_rng().fill(&mut key);
        CookieIssuer { key }
    }

    pub(crate) fn generate(&self) -> Bytes {
        self.generate_at(unix_seconds(SystemTime::now()))
    }

    pub(crate) fn generate_at(&self, timestamp: u32) -> Bytes {
        let mut cookie = BytesMut::with_capacity(COOKIE_LENGTH);
        cookie.put_u32(timestamp);

        let mut mac =
            HmacSha1::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(&cookie[..COOKIE_TIMESTAMP_LENGTH]);
        cookie.extend_from_slice(&mac.finalize().into_bytes());

        cookie.freeze()
    }

    /// Checks the HMAC first, then the freshness window. An unverifiable
    /// cookie and a stale one are distinct failures: the former is dropped
    /// silently, the latter answered with ERROR(Stale Cookie Error).
    pub(crate) fn verify(&self, cookie: &Bytes) -> Result<()> {
        self.verify_at(cookie, SystemTime::now())
    }

    pub(crate) fn verify_at(&self, cookie: &Bytes, now: SystemTime) -> Result<()> {
        if cookie.len() != COOKIE_LENGTH {
            return Err(Error::ErrCookieTooShort);
        }

        let mut mac =
            HmacSha1::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(&cookie[..COOKIE_TIMESTAMP_LENGTH]);
        if mac
            .verify_slice(&cookie[COOKIE_TIMESTAMP_LENGTH..])
            .is_err()
        {
            return Err(Error::ErrCookieInvalid);
        }

        let issued = cookie_timestamp(cookie);
        let now_secs = unix_seconds(now);
        if issued > now_secs || now_secs - issued > COOKIE_LIFETIME.as_secs() as u32 {
            return Err(Error::ErrCookieStale);
        }

        Ok(())
    }
}

pub(crate) fn cookie_timestamp(cookie: &Bytes) -> u32 {
    u32::from_be_bytes([cookie[0], cookie[1], cookie[2], cookie[3]])
}

/// Staleness measure for ERROR(Stale Cookie Error), in microseconds
/// (RFC 4960 Sec 3.3.10.3). Zero for a cookie dated in the future.
pub(crate) fn cookie_staleness_micros(cookie: &Bytes, now: SystemTime) -> u32 {
    let issued = cookie_timestamp(cookie);
    let now_secs = unix_seconds(now);
    now_secs
        .saturating_sub(issued)
        .saturating_sub(COOKIE_LIFETIME.as_secs() as u32)
        .saturating_mul(1_000_000)
}

fn unix_seconds(t: SystemTime) -> u32 {
    t.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cookie_round_trip() -> Result<()> {
        let issuer = CookieIssuer::new();
        let cookie = issuer.generate();
        assert_eq!(cookie.len(), COOKIE_LENGTH);
        issuer.verify(&cookie)?;
        Ok(())
    }

    #[test]
    fn test_cookie_tampered_hmac_is_rejected() {
        let issuer = CookieIssuer::new();
        let cookie = issuer.generate();

        let mut tampered = cookie.to_vec();
        tampered[COOKIE_LENGTH - 1] ^= 0x01;
        assert_eq!(
            issuer.verify(&Bytes::from(tampered)).err(),
            Some(Error::ErrCookieInvalid)
        );
    }

    #[test]
    fn test_cookie_foreign_key_is_rejected() {
        let cookie = CookieIssuer::new().generate();
        let other = CookieIssuer::new();
        assert_eq!(other.verify(&cookie).err(), Some(Error::ErrCookieInvalid));
    }

    #[test]
    fn test_cookie_stale_timestamp_is_rejected() {
        let issuer = CookieIssuer::new();
        let now = SystemTime::now();

        let fresh = issuer.generate_at(unix_seconds(now) - 30);
        assert!(issuer.verify_at(&fresh, now).is_ok());

        let expired = issuer.generate_at(unix_seconds(now) - 120);
        assert_eq!(
            issuer.verify_at(&expired, now).err(),
            Some(Error::ErrCookieStale)
        );
        assert_eq!(cookie_staleness_micros(&expired, now), 60_000_000);

        // dated in the future
        let future = issuer.generate_at(unix_seconds(now) + 120);
        assert_eq!(
            issuer.verify_at(&future, now).err(),
            Some(Error::ErrCookieStale)
        );
        assert_eq!(cookie_staleness_micros(&future, now), 0);
    }

    #[test]
    fn test_cookie_wrong_length_is_rejected() {
        let issuer = CookieIssuer::new();
        assert_eq!(
            issuer.verify(&Bytes::from_static(&[0u8; 8])).err(),
            Some(Error::ErrCookieTooShort)
        );
    }
}
