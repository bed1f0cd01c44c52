use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ark_std::rand::{rngs::StdRng, SeedableRng};
use clap::{Args, Parser, Subcommand};
use jodi::audit::{AuditKey, AuditKeyring, AuditLedger};
use jodi::billing::BillingIssuer;
use jodi::calldetails::CallDetails;
use jodi::crypto::groupsig::{self, GroupSecretKey};
use jodi::directory::{Node, NodeDirectory, SharedDirectory};
use jodi::keyrotation::KeyRotationManager;
use jodi::node::{EvaluatorNode, MessageStoreNode, RequestAuthorizer};
use jodi::protocol::{ProtocolContext, ProviderCredentials};
use jodi::transport::{serve, LocalTransport, NodeTransport, TcpTransport};
use jodi::utils::fresh_rng;
use jodi::{ProtocolConfig, ProtocolEngine, TokenRetrieval};
use tokio::net::TcpListener;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    about = "JODI evaluator and message-store node",
    author,
    version
)]
struct Cli {
    /// Seed for the deployment-wide group and billing keys
    #[arg(long = "deployment-seed", env = "JODI_DEPLOYMENT_SEED", default_value_t = 0)]
    deployment_seed: u64,

    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve VOPRF evaluations
    Evaluator {
        /// Network name; the node id is derived from it
        #[arg(long = "fqdn")]
        fqdn: String,

        #[arg(long = "listen", default_value = "0.0.0.0:10430")]
        listen: SocketAddr,
    },
    /// Hold encrypted records for a bounded time
    Store {
        #[arg(long = "fqdn")]
        fqdn: String,

        #[arg(long = "listen", default_value = "0.0.0.0:10431")]
        listen: SocketAddr,
    },
    /// Publish or retrieve a passport through running nodes over TCP
    Provider {
        /// JSON list of evaluators (`[{"id", "fqdn", "url"}]`)
        #[arg(long = "evaluators", value_name = "FILE")]
        evaluators: PathBuf,

        /// JSON list of message stores, same layout as the evaluators
        #[arg(long = "stores", value_name = "FILE")]
        stores: PathBuf,

        /// JSON object mapping node id to audit verifying key, both hex
        #[arg(long = "keyring", value_name = "FILE")]
        keyring: PathBuf,

        #[arg(long = "src")]
        src: String,

        #[arg(long = "dst")]
        dst: String,

        /// Publish this token; retrieve when omitted
        #[arg(long = "publish")]
        publish: Option<String>,
    },
    /// Run the publish, rotation and expiry scenario against an in-process network
    Simulate {
        #[arg(long = "evaluators", default_value_t = 5)]
        evaluators: usize,

        #[arg(long = "stores", default_value_t = 5)]
        stores: usize,

        #[arg(long = "src", default_value = "+12025550123")]
        src: String,

        #[arg(long = "dst", default_value = "+14155550123")]
        dst: String,

        #[arg(long = "token", default_value = "passport")]
        token: String,
    },
}

/// Flags that take precedence over the environment configuration.
#[derive(Args, Debug)]
struct ConfigOverrides {
    /// Evaluators contacted per derivation (env: n_ev)
    #[arg(long = "n-ev", global = true)]
    n_ev: Option<usize>,

    /// Stores contacted per publish/retrieve (env: n_ms)
    #[arg(long = "n-ms", global = true)]
    n_ms: Option<usize>,

    /// Number of OPRF key epochs (env: KEYLIST_SIZE)
    #[arg(long = "keylist-size", global = true)]
    keylist_size: Option<usize>,

    /// Seconds between key rotations (env: ROTATION_INTERVAL_SECONDS)
    #[arg(long = "rotation-interval", global = true)]
    rotation_interval: Option<u64>,

    /// Seconds a rotated-out key stays usable (env: LIVENESS_WINDOW_SECONDS)
    #[arg(long = "liveness-window", global = true)]
    liveness_window: Option<u64>,

    /// Record lifetime on stores in seconds (env: T_MAX_SECONDS)
    #[arg(long = "t-max", global = true)]
    t_max: Option<u64>,

    /// Stores per candidate when several call ids exist (env: STORES_PER_MULTI_CID)
    #[arg(long = "stores-per-multi-cid", global = true)]
    stores_per_multi_cid: Option<usize>,

    /// Bound on each evaluator call in milliseconds (env: EVAL_TIMEOUT_MS)
    #[arg(long = "eval-timeout-ms", global = true)]
    eval_timeout_ms: Option<u64>,

    /// Bound on a whole retrieval in milliseconds (env: RETRIEVE_TIMEOUT_MS)
    #[arg(long = "retrieve-timeout-ms", global = true)]
    retrieve_timeout_ms: Option<u64>,
}

impl ConfigOverrides {
    fn apply(&self, mut config: ProtocolConfig) -> jodi::Result<ProtocolConfig> {
        if let Some(n_ev) = self.n_ev {
            config.n_ev = n_ev;
        }
        if let Some(n_ms) = self.n_ms {
            config.n_ms = n_ms;
        }
        if let Some(keylist_size) = self.keylist_size {
            config.keylist_size = keylist_size;
        }
        if let Some(secs) = self.rotation_interval {
            config.rotation_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = self.liveness_window {
            config.liveness_window = Duration::from_secs(secs);
        }
        if let Some(secs) = self.t_max {
            config.record_ttl = Duration::from_secs(secs);
        }
        if let Some(width) = self.stores_per_multi_cid {
            config.stores_per_multi_cid = width;
        }
        if let Some(ms) = self.eval_timeout_ms {
            config.eval_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.retrieve_timeout_ms {
            config.retrieve_timeout = Duration::from_millis(ms);
        }
        config.validate()?;
        Ok(config)
    }
}

/// Keys every node and provider of one deployment shares.
struct DeploymentKeys {
    gsk: GroupSecretKey,
    issuer: BillingIssuer,
}

impl DeploymentKeys {
    fn from_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let gsk = groupsig::setup(&mut rng);
        let issuer = BillingIssuer::generate(&mut rng);
        Self { gsk, issuer }
    }

    fn authorizer(&self) -> RequestAuthorizer {
        RequestAuthorizer::new(self.gsk.public_key(), self.issuer.verification_key())
    }

    /// Group key plus a freshly endorsed billing token.
    fn credentials(&self) -> jodi::Result<ProviderCredentials> {
        Ok(ProviderCredentials {
            gsk: self.gsk.clone(),
            bt: self.issuer.create_endorsed_token(&mut fresh_rng())?,
        })
    }

    fn provider(
        &self,
        config: &ProtocolConfig,
        directory: SharedDirectory,
        transport: Arc<dyn NodeTransport>,
        keyring: Arc<AuditKeyring>,
    ) -> jodi::Result<ProtocolEngine> {
        ProtocolEngine::new(ProtocolContext {
            config: config.clone(),
            directory,
            transport,
            credentials: self.credentials()?,
            keyring,
            ledger: AuditLedger::new(),
        })
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("jodi-node failed: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = cli.overrides.apply(ProtocolConfig::from_env()?)?;
    info!(?config, "configuration loaded");
    let keys = DeploymentKeys::from_seed(cli.deployment_seed);

    match cli.command {
        Command::Evaluator { fqdn, listen } => {
            let node = Node::new(fqdn, listen.to_string());
            let audit = announce(&node)?;
            let manager = Arc::new(KeyRotationManager::new(&config)?);
            let rotation = manager.spawn_rotation();
            let handler = Arc::new(EvaluatorNode::new(audit, manager, keys.authorizer()));

            let listener = TcpListener::bind(listen).await?;
            let result = serve(listener, handler).await;
            rotation.stop().await;
            result?;
        }
        Command::Store { fqdn, listen } => {
            let node = Node::new(fqdn, listen.to_string());
            let audit = announce(&node)?;
            let handler = Arc::new(MessageStoreNode::new(audit, keys.authorizer(), config.record_ttl));

            let purger = Arc::clone(&handler);
            let ttl = config.record_ttl;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(ttl);
                loop {
                    ticker.tick().await;
                    let purged = purger.purge_expired().await;
                    if purged > 0 {
                        info!(purged, "expired records purged");
                    }
                }
            });

            let listener = TcpListener::bind(listen).await?;
            serve(listener, handler).await?;
        }
        Command::Provider {
            evaluators,
            stores,
            keyring,
            src,
            dst,
            publish,
        } => {
            let engine = tcp_provider(&config, &keys, &evaluators, &stores, &keyring).await?;
            match publish {
                Some(token) => {
                    let receipt = engine.publish(&src, &dst, &token).await?;
                    println!(
                        "published {} to {}/{} stores in {:?}",
                        receipt.idx,
                        receipt.acknowledged,
                        receipt.contacted,
                        receipt.timing.total()
                    );
                }
                None => print_retrieval("retrieve", &engine.retrieve(&src, &dst).await?),
            }
            println!("audit bindings: {}", engine.ledger().len().await);
        }
        Command::Simulate {
            evaluators,
            stores,
            src,
            dst,
            token,
        } => {
            println!(
                "scenario: n_ev={} n_ms={} over {} evaluators and {} stores",
                config.n_ev, config.n_ms, evaluators, stores
            );
            let report = simulate(&config, &keys, evaluators, stores, &src, &dst, &token).await?;
            println!("published to {} stores", report.acknowledged);
            print_retrieval("fresh", &report.fresh);
            print_retrieval("after rotation", &report.after_rotation);
            print_retrieval("after expiry", &report.after_expiry);
        }
    }
    Ok(())
}

/// Generate the node's audit key and print what providers need to trust it.
fn announce(node: &Node) -> Result<AuditKey, Box<dyn std::error::Error>> {
    let audit = AuditKey::generate(node.id);
    println!("directory entry: {}", serde_json::to_string(&node.to_entry())?);
    println!("audit key:       {}", hex::encode(audit.verifying_key().to_bytes()));
    Ok(audit)
}

async fn tcp_provider(
    config: &ProtocolConfig,
    keys: &DeploymentKeys,
    evaluators: &Path,
    stores: &Path,
    keyring: &Path,
) -> Result<ProtocolEngine, Box<dyn std::error::Error>> {
    let directory = NodeDirectory::from_json(
        &tokio::fs::read_to_string(evaluators).await?,
        &tokio::fs::read_to_string(stores).await?,
    )?;
    let keyring = AuditKeyring::from_json(&tokio::fs::read_to_string(keyring).await?)?;
    info!(
        evaluators = directory.evaluators.len(),
        stores = directory.stores.len(),
        audit_keys = keyring.len(),
        "provider directory loaded"
    );
    Ok(keys.provider(
        config,
        SharedDirectory::new(directory),
        Arc::new(TcpTransport::new()),
        Arc::new(keyring),
    )?)
}

fn print_retrieval(step: &str, retrieval: &TokenRetrieval) {
    match &retrieval.token {
        Some(found) => println!(
            "{}: {:?} from {} candidate(s) in {:?}",
            step,
            found,
            retrieval.candidates,
            retrieval.timing.total()
        ),
        None => warn!(step, candidates = retrieval.candidates, "token not found"),
    }
}

/// Retrieval results at each step of [`simulate`].
#[derive(Debug)]
struct ScenarioReport {
    acknowledged: usize,
    fresh: TokenRetrieval,
    after_rotation: TokenRetrieval,
    after_expiry: TokenRetrieval,
}

/// Publish, retrieve, rotate the call's key index on every evaluator and
/// retrieve inside the liveness window, then retrieve once the record TTL has
/// passed.
async fn simulate(
    config: &ProtocolConfig,
    keys: &DeploymentKeys,
    n_evaluators: usize,
    n_stores: usize,
    src: &str,
    dst: &str,
    token: &str,
) -> Result<ScenarioReport, Box<dyn std::error::Error>> {
    let transport = LocalTransport::new();
    let authorizer = keys.authorizer();
    let mut keyring = AuditKeyring::new();

    let mut ev_nodes = Vec::with_capacity(n_evaluators);
    let mut managers = Vec::with_capacity(n_evaluators);
    for i in 0..n_evaluators {
        let node = Node::new(format!("ev-{}.jodi.local", i), format!("ev-{}.jodi.local:10430", i));
        let audit = AuditKey::generate(node.id);
        keyring.insert(node.id, audit.verifying_key());
        let manager = Arc::new(KeyRotationManager::new(config)?);
        transport
            .register(
                node.address.clone(),
                Arc::new(EvaluatorNode::new(audit, Arc::clone(&manager), authorizer)),
            )
            .await;
        managers.push(manager);
        ev_nodes.push(node);
    }

    let mut ms_nodes = Vec::with_capacity(n_stores);
    for i in 0..n_stores {
        let node = Node::new(format!("ms-{}.jodi.local", i), format!("ms-{}.jodi.local:10431", i));
        let audit = AuditKey::generate(node.id);
        keyring.insert(node.id, audit.verifying_key());
        transport
            .register(
                node.address.clone(),
                Arc::new(MessageStoreNode::new(audit, authorizer, config.record_ttl)),
            )
            .await;
        ms_nodes.push(node);
    }

    let directory = SharedDirectory::new(NodeDirectory::new(ev_nodes, ms_nodes));
    let keyring = Arc::new(keyring);
    let transport: Arc<dyn NodeTransport> = Arc::new(transport);
    let originating = keys.provider(config, directory.clone(), Arc::clone(&transport), Arc::clone(&keyring))?;
    let terminating = keys.provider(config, directory, transport, keyring)?;

    let receipt = originating.publish(src, dst, token).await?;
    let fresh = terminating.retrieve(src, dst).await?;

    let i_k = CallDetails::new(src, dst).key_index(config.keylist_size);
    for manager in &managers {
        manager.rotate(i_k).await?;
    }
    info!(i_k, "rotated key index on every evaluator");
    tokio::time::sleep(Duration::from_secs(2)).await;
    let after_rotation = terminating.retrieve(src, dst).await?;

    tokio::time::sleep(config.record_ttl).await;
    let after_expiry = terminating.retrieve(src, dst).await?;

    Ok(ScenarioReport {
        acknowledged: receipt.acknowledged,
        fresh,
        after_rotation,
        after_expiry,
    })
}

fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info".into()),
            )
            .try_init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_simulate_walks_the_scenario() {
        let config = ProtocolConfig::default();
        let keys = DeploymentKeys::from_seed(7);
        let report = simulate(&config, &keys, 5, 5, "+12025550123", "+14155550123", "tok-A")
            .await
            .unwrap();

        assert_eq!(report.acknowledged, 3);
        assert_eq!(report.fresh.token.as_deref(), Some("tok-A"));
        assert_eq!(report.fresh.candidates, 1);
        // three evaluators, each with an active and an expiring key
        assert_eq!(report.after_rotation.candidates, 8);
        assert_eq!(report.after_rotation.token.as_deref(), Some("tok-A"));
        assert!(report.after_expiry.token.is_none());
    }

    #[test]
    fn test_overrides_cover_every_option() {
        let cli = Cli::parse_from([
            "jodi-node",
            "--n-ev",
            "4",
            "--stores-per-multi-cid",
            "2",
            "--eval-timeout-ms",
            "250",
            "--retrieve-timeout-ms",
            "750",
            "--t-max",
            "30",
            "simulate",
        ]);
        let config = cli.overrides.apply(ProtocolConfig::default()).unwrap();
        assert_eq!(config.n_ev, 4);
        assert_eq!(config.stores_per_multi_cid, 2);
        assert_eq!(config.eval_timeout, Duration::from_millis(250));
        assert_eq!(config.retrieve_timeout, Duration::from_millis(750));
        assert_eq!(config.record_ttl, Duration::from_secs(30));
        assert_eq!(config.n_ms, ProtocolConfig::default().n_ms);
    }

    #[test]
    fn test_overrides_are_validated() {
        let cli = Cli::parse_from(["jodi-node", "--liveness-window", "20", "simulate"]);
        assert!(cli.overrides.apply(ProtocolConfig::default()).is_err());
    }
}
