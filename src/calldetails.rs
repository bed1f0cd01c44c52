//! Canonical call details shared by both providers of a call

use chrono::{NaiveDate, Utc};

use crate::utils::{be_bytes_mod, hash160, sha256};

/// `"+<src digits>.+<dst digits>.<YYYY-MM-DD>"`.
///
/// The date has day granularity, so both sides agree on the same string for
/// any call placed within the same UTC calendar day.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CallDetails(String);

/// Strip every non-digit and prefix `+`.
pub fn normalize_tn(tn: &str) -> String {
    let digits: String = tn.chars().filter(|c| c.is_ascii_digit()).collect();
    format!("+{}", digits)
}

impl CallDetails {
    /// Call details for a call placed today (UTC).
    pub fn new(src: &str, dst: &str) -> Self {
        Self::on_date(src, dst, Utc::now().date_naive())
    }

    pub fn on_date(src: &str, dst: &str, date: NaiveDate) -> Self {
        Self(format!(
            "{}.{}.{}",
            normalize_tn(src),
            normalize_tn(dst),
            date.format("%Y-%m-%d")
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }

    /// Key-epoch index both parties reference: `hash160(details) mod keylist_size`.
    pub fn key_index(&self, keylist_size: usize) -> usize {
        be_bytes_mod(&hash160(self.as_bytes()), keylist_size.max(1))
    }

    /// Lookup key used to pick evaluators.
    pub fn lookup_key(&self) -> [u8; 32] {
        sha256(&[self.as_bytes()])
    }
}
