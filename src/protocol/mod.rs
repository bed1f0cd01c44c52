//! Provider-side protocols
//!
//! [`callid::CallIdProtocol`] agrees on a call identifier with the
//! evaluators, [`storage::StorageProtocol`] publishes and retrieves the
//! encrypted passport under that identifier. Both share one
//! [`ProtocolContext`].

pub mod callid;
pub mod storage;

use std::ops::AddAssign;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{AuditKeyring, AuditLedger};
use crate::billing::BillingToken;
use crate::config::ProtocolConfig;
use crate::crypto::groupsig::GroupSecretKey;
use crate::directory::SharedDirectory;
use crate::transport::NodeTransport;

pub use callid::{CallIdProtocol, Derivation};
pub use storage::{PublishReceipt, Retrieval, StorageProtocol};

/// Agreed call identifier: `sha256` of the XOR of unblinded shares.
pub type CallId = [u8; 32];

/// What a provider brings to every request.
#[derive(Clone, Debug)]
pub struct ProviderCredentials {
    pub gsk: GroupSecretKey,
    pub bt: BillingToken,
}

/// Everything the provider-side protocols read, shared across operations.
#[derive(Clone)]
pub struct ProtocolContext {
    pub config: ProtocolConfig,
    pub directory: SharedDirectory,
    pub transport: Arc<dyn NodeTransport>,
    pub credentials: ProviderCredentials,
    pub keyring: Arc<AuditKeyring>,
    pub ledger: AuditLedger,
}

/// Wall-clock split of one operation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Timing {
    /// Local work: blinding, signing, verification, decryption
    pub compute: Duration,
    /// Time spent waiting on node fan-out
    pub network: Duration,
}

impl Timing {
    pub fn total(&self) -> Duration {
        self.compute + self.network
    }

    /// Split `elapsed` into network time and the remaining compute time.
    pub(crate) fn from_elapsed(elapsed: Duration, network: Duration) -> Self {
        Self {
            compute: elapsed.saturating_sub(network),
            network,
        }
    }
}

impl AddAssign for Timing {
    fn add_assign(&mut self, other: Self) {
        self.compute += other.compute;
        self.network += other.network;
    }
}
