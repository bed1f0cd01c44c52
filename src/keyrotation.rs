//! OPRF key epochs and their rotation
//!
//! The manager owns a ring of `keylist_size` slots. Each slot holds one
//! active epoch and, for `liveness_window` after a rotation, the epoch it
//! replaced. Rotation and lookup go through one lock, so a lookup never sees
//! a slot halfway through a swap.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::config::ProtocolConfig;
use crate::crypto::voprf::OprfKeyPair;
use crate::error::{JodiError, Result};
use crate::utils::fresh_rng;

/// One OPRF key bound to a slot index.
#[derive(Debug)]
pub struct KeyEpoch {
    pub index: usize,
    /// Monotonic counter over all epochs minted by a manager
    pub generation: u64,
    pub keypair: OprfKeyPair,
    /// Set once the epoch has been rotated out
    pub expires_at: Option<Instant>,
}

#[derive(Debug)]
struct EpochSlot {
    active: Arc<KeyEpoch>,
    expiring: Option<Arc<KeyEpoch>>,
}

#[derive(Debug)]
struct EpochRing {
    slots: Vec<EpochSlot>,
    next_generation: u64,
}

impl EpochRing {
    fn mint(&mut self, index: usize) -> Arc<KeyEpoch> {
        let generation = self.next_generation;
        self.next_generation += 1;
        Arc::new(KeyEpoch {
            index,
            generation,
            keypair: OprfKeyPair::generate(&mut fresh_rng()),
            expires_at: None,
        })
    }
}

/// Single owner of the OPRF key ring, shared by the rotation task and request handlers.
#[derive(Debug)]
pub struct KeyRotationManager {
    keylist_size: usize,
    rotation_interval: Duration,
    liveness_window: Duration,
    ring: RwLock<EpochRing>,
}

impl KeyRotationManager {
    /// Build a manager with `keylist_size` fresh epochs.
    pub fn new(config: &ProtocolConfig) -> Result<Self> {
        config.validate()?;
        let mut ring = EpochRing {
            slots: Vec::with_capacity(config.keylist_size),
            next_generation: 0,
        };
        for index in 0..config.keylist_size {
            let active = ring.mint(index);
            ring.slots.push(EpochSlot {
                active,
                expiring: None,
            });
        }
        Ok(Self {
            keylist_size: config.keylist_size,
            rotation_interval: config.rotation_interval,
            liveness_window: config.liveness_window,
            ring: RwLock::new(ring),
        })
    }

    pub fn keylist_size(&self) -> usize {
        self.keylist_size
    }

    /// Replace every epoch with a fresh one and forget expiring keys.
    pub async fn initialize(&self) {
        let mut ring = self.ring.write().await;
        for index in 0..self.keylist_size {
            let active = ring.mint(index);
            ring.slots[index] = EpochSlot {
                active,
                expiring: None,
            };
        }
        info!(keylist_size = self.keylist_size, "initialized OPRF key epochs");
    }

    /// Move the active epoch at `index` into its liveness window and mint a new one.
    pub async fn rotate(&self, index: usize) -> Result<()> {
        self.check_index(index)?;
        let expires_at = Instant::now() + self.liveness_window;

        let mut ring = self.ring.write().await;
        let fresh = ring.mint(index);
        let slot = &mut ring.slots[index];
        let old = std::mem::replace(&mut slot.active, fresh);
        slot.expiring = Some(Arc::new(KeyEpoch {
            index,
            generation: old.generation,
            keypair: old.keypair.clone(),
            expires_at: Some(expires_at),
        }));
        debug!(
            index,
            expired_generation = old.generation,
            active_generation = slot.active.generation,
            "rotated OPRF key"
        );
        Ok(())
    }

    /// Live epochs at `index`: the active one first, then the expiring one if
    /// still inside its window.
    pub async fn lookup(&self, index: usize) -> Result<Vec<Arc<KeyEpoch>>> {
        self.check_index(index)?;
        let now = Instant::now();
        let ring = self.ring.read().await;
        let slot = &ring.slots[index];

        let mut epochs = vec![Arc::clone(&slot.active)];
        if let Some(expiring) = &slot.expiring {
            if expiring.expires_at.is_some_and(|at| now < at) {
                epochs.push(Arc::clone(expiring));
            }
        }
        Ok(epochs)
    }

    /// Start the timer task that rotates one index per interval, cycling through the ring.
    pub fn spawn_rotation(self: &Arc<Self>) -> RotationHandle {
        let manager = Arc::clone(self);
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let task = tokio::spawn(async move {
            let mut index = 0usize;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(manager.rotation_interval) => {}
                    _ = &mut stop_rx => {
                        debug!("key rotation stopped");
                        return;
                    }
                }
                // index is always in range, so rotate cannot fail here
                let _ = manager.rotate(index).await;
                index = (index + 1) % manager.keylist_size;
            }
        });

        info!(
            interval_secs = self.rotation_interval.as_secs(),
            liveness_secs = self.liveness_window.as_secs(),
            "key rotation started"
        );
        RotationHandle {
            stop: Some(stop_tx),
            task,
        }
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.keylist_size {
            return Err(JodiError::InvalidParameter(format!(
                "key index {} out of range 0..{}",
                index, self.keylist_size
            )));
        }
        Ok(())
    }
}

/// Controls a running rotation task.
#[derive(Debug)]
pub struct RotationHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl RotationHandle {
    /// Stop rotating and wait for the task to finish.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = (&mut self.task).await;
    }
}

impl Drop for RotationHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
