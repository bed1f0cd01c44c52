//! # JODI
//!
//! Privacy-preserving out-of-band caller authentication. Two telephone
//! providers that both know a call's `(src, dst, date)` agree on a 32-byte
//! call id without revealing the call to anyone else, then use that id to
//! publish and retrieve an encrypted passport on a set of untrusted message
//! stores.
//!
//! ## Building blocks
//!
//! - **Call-id agreement**: every provider blinds `src‖dst‖date`, asks
//!   `n_ev` DHT-selected evaluators for a VOPRF evaluation under the key
//!   indexed by the call details, verifies and unblinds each share and XORs
//!   them together ([`protocol::callid`]).
//! - **Key rotation**: evaluators rotate OPRF keys on a fixed interval and
//!   keep the previous key usable for a liveness window, so a derivation may
//!   yield up to `2^n_ev` candidates ([`keyrotation`]).
//! - **Storage**: the passport is AES-GCM encrypted under the call id and
//!   stored under `idx = sha256(call_id)` ([`protocol::storage`]).
//! - **Authorization and accountability**: requests carry a group signature
//!   and a blinded billing token; nodes answer with ed25519 audit signatures
//!   over `(hreq, hres)` ([`billing`], [`audit`]).
//!
//! ## Example
//!
//! ```ignore
//! use jodi::ProtocolEngine;
//!
//! let originating = ProtocolEngine::new(ctx_a)?;
//! originating.publish("+12025550123", "+14155550123", "passport").await?;
//!
//! let terminating = ProtocolEngine::new(ctx_b)?;
//! let found = terminating.retrieve("+12025550123", "+14155550123").await?;
//! assert_eq!(found.token.as_deref(), Some("passport"));
//! ```

pub mod audit;
pub mod billing;
pub mod calldetails;
pub mod config;
pub mod crypto;
pub mod dht;
pub mod directory;
pub mod engine;
pub mod error;
pub mod keyrotation;
pub mod messages;
pub mod node;
pub mod protocol;
pub mod security;
pub mod transport;
pub mod utils;

#[cfg(test)]
mod testing;

pub use config::ProtocolConfig;
pub use engine::{ProtocolEngine, TokenRetrieval};
pub use error::{JodiError, Result};
