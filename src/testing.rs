//! In-process network of evaluator and store nodes for tests.

use std::sync::Arc;

use crate::audit::{AuditKey, AuditKeyring, AuditLedger};
use crate::billing::BillingIssuer;
use crate::config::ProtocolConfig;
use crate::crypto::groupsig::{self, GroupSecretKey};
use crate::directory::{Node, NodeDirectory, SharedDirectory};
use crate::keyrotation::KeyRotationManager;
use crate::node::{EvaluatorNode, MessageStoreNode, RequestAuthorizer};
use crate::protocol::{ProtocolContext, ProviderCredentials};
use crate::transport::LocalTransport;

pub(crate) struct TestNetwork {
    pub config: ProtocolConfig,
    pub directory: SharedDirectory,
    pub transport: LocalTransport,
    pub keyring: Arc<AuditKeyring>,
    pub gsk: GroupSecretKey,
    pub issuer: BillingIssuer,
    pub evaluators: Vec<Arc<EvaluatorNode>>,
    pub stores: Vec<Arc<MessageStoreNode>>,
}

impl TestNetwork {
    pub async fn new(n_evaluators: usize, n_stores: usize, config: ProtocolConfig) -> Self {
        let mut rng = ark_std::test_rng();
        let gsk = groupsig::setup(&mut rng);
        let issuer = BillingIssuer::generate(&mut rng);
        let authorizer = RequestAuthorizer::new(gsk.public_key(), issuer.verification_key());
        let transport = LocalTransport::new();
        let mut keyring = AuditKeyring::new();

        let mut ev_nodes = Vec::new();
        let mut evaluators = Vec::new();
        for i in 0..n_evaluators {
            let node = Node::new(format!("ev-{}.jodi.local", i), format!("ev-{}.jodi.local:10430", i));
            let audit = AuditKey::generate(node.id);
            keyring.insert(node.id, audit.verifying_key());
            let keys = Arc::new(KeyRotationManager::new(&config).unwrap());
            let handler = Arc::new(EvaluatorNode::new(audit, keys, authorizer));
            transport.register(node.address.clone(), handler.clone()).await;
            evaluators.push(handler);
            ev_nodes.push(node);
        }

        let mut ms_nodes = Vec::new();
        let mut stores = Vec::new();
        for i in 0..n_stores {
            let node = Node::new(format!("ms-{}.jodi.local", i), format!("ms-{}.jodi.local:10431", i));
            let audit = AuditKey::generate(node.id);
            keyring.insert(node.id, audit.verifying_key());
            let handler = Arc::new(MessageStoreNode::new(audit, authorizer, config.record_ttl));
            transport.register(node.address.clone(), handler.clone()).await;
            stores.push(handler);
            ms_nodes.push(node);
        }

        Self {
            config,
            directory: SharedDirectory::new(NodeDirectory::new(ev_nodes, ms_nodes)),
            transport,
            keyring: Arc::new(keyring),
            gsk,
            issuer,
            evaluators,
            stores,
        }
    }

    /// A provider context with its own billing token and audit ledger.
    pub fn provider(&self) -> ProtocolContext {
        let bt = self
            .issuer
            .create_endorsed_token(&mut crate::utils::fresh_rng())
            .unwrap();
        ProtocolContext {
            config: self.config.clone(),
            directory: self.directory.clone(),
            transport: Arc::new(self.transport.clone()),
            credentials: ProviderCredentials {
                gsk: self.gsk.clone(),
                bt,
            },
            keyring: Arc::clone(&self.keyring),
            ledger: AuditLedger::new(),
        }
    }

    /// Rotate key index `i` on every evaluator.
    pub async fn rotate_all(&self, i: usize) {
        for ev in &self.evaluators {
            ev.keys().rotate(i).await.unwrap();
        }
    }

    /// Flip the availability flag of every node whose fqdn matches.
    pub async fn set_available(&self, fqdn: &str, available: bool) {
        let mut dir = self.directory.snapshot().await;
        for node in dir.evaluators.iter_mut().chain(dir.stores.iter_mut()) {
            if node.fqdn == fqdn {
                node.available = available;
            }
        }
        self.directory.replace(dir).await;
    }
}
