//! Startup configuration: environment variables mirroring the base
//! `dotenv`-loaded set, plus the two JSON bundles that seed the crypto
//! facade and the zk-auth validators.
//!
//! Not present in the retrieved base files as a standalone module; grounded
//! on `server/server.rs`'s inline `dotenv::dotenv()?` / `env::var(...)?` calls
//! in `start_server`, pulled out here so `main` can build one `ServerConfig`
//! up front instead of reading the environment scattered across the file.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use libsignal_protocol::{IdentityKeyPair, PrivateKey, PublicKey};
use serde::Deserialize;
use tracing::info;

/// `certs/trust-root.json`: the trust root keypair used to sign server
/// certificates.
#[derive(Debug, Deserialize)]
struct TrustRootFile {
    private_key: String,
    public_key: String,
}

/// `certs/zk-params.json`: the three anonymous-credential parameter bundles.
/// The server only needs the secret halves; public halves are handed out
/// verbatim to clients by whichever route exposes server params.
#[derive(Debug, Deserialize)]
struct ZkParamsFile {
    zk_secret: String,
    zk_public: String,
    generic_zk_secret: String,
    backup_zk_secret: String,
}

#[derive(Debug, Clone)]
pub struct TrustRoot {
    pub private_key: PrivateKey,
    pub public_key: PublicKey,
}

#[derive(Debug, Clone)]
pub struct ZkParams {
    pub zk_secret: Vec<u8>,
    pub zk_public: Vec<u8>,
    pub generic_zk_secret: Vec<u8>,
    pub backup_zk_secret: Vec<u8>,
}

/// Plain data built once in `main` and carried through `ServerState` rather
/// than read from the environment a second time anywhere else.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub address: String,
    pub http_port: String,
    pub https_port: String,
    pub link_device_secret: String,
    pub trust_root: TrustRoot,
    pub zk_params: ZkParams,
    /// How long a `shift`/`pushAndWait` rendezvous (e.g. device provisioning)
    /// waits for its reply before giving up.
    pub queue_timeout_seconds: u64,
}

impl ServerConfig {
    /// Builds a config with freshly generated key material instead of
    /// reading `certs/*.json`, for the test façade (`facade.rs`) and unit
    /// tests that have no `certs/` directory to load.
    pub fn for_test() -> Self {
        let (_, trust_root) = generate_trust_root();
        let mut secret = |len: usize| -> Vec<u8> {
            let mut bytes = vec![0u8; len];
            rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
            bytes
        };
        Self {
            address: "127.0.0.1".to_owned(),
            http_port: "0".to_owned(),
            https_port: "0".to_owned(),
            link_device_secret: "test-link-device-secret".to_owned(),
            trust_root,
            zk_params: ZkParams {
                zk_secret: secret(32),
                zk_public: secret(32),
                generic_zk_secret: secret(32),
                backup_zk_secret: secret(32),
            },
            queue_timeout_seconds: 60,
        }
    }

    /// Mirrors `start_server`'s own setup: `dotenv::dotenv()` then
    /// `env::var("SERVER_ADDRESS")` / `"HTTP_PORT"` / `"HTTPS_PORT"`, plus
    /// `"LINK_DEVICE_SECRET"` (read inline, twice, by the link-device
    /// handlers) collected up front here instead.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let address = std::env::var("SERVER_ADDRESS").context("SERVER_ADDRESS not set")?;
        let http_port = std::env::var("HTTP_PORT").context("HTTP_PORT not set")?;
        let https_port = std::env::var("HTTPS_PORT").context("HTTPS_PORT not set")?;
        let link_device_secret =
            std::env::var("LINK_DEVICE_SECRET").context("LINK_DEVICE_SECRET not set")?;

        let trust_root = load_trust_root(Path::new("certs/trust-root.json"))?;
        let zk_params = load_zk_params(Path::new("certs/zk-params.json"))?;
        let queue_timeout_seconds = std::env::var("QUEUE_TIMEOUT_SECONDS")
            .ok()
            .map(|v| v.parse().context("QUEUE_TIMEOUT_SECONDS is not a valid number"))
            .transpose()?
            .unwrap_or(60);

        info!(%address, %http_port, %https_port, "loaded server configuration");

        Ok(Self {
            address,
            http_port,
            https_port,
            link_device_secret,
            trust_root,
            zk_params,
            queue_timeout_seconds,
        })
    }
}

fn load_trust_root(path: &Path) -> Result<TrustRoot> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading trust root file {}", path.display()))?;
    let file: TrustRootFile = serde_json::from_str(&raw)
        .with_context(|| format!("parsing trust root file {}", path.display()))?;

    let private_bytes = BASE64.decode(file.private_key).context("trust root private_key is not base64")?;
    let public_bytes = BASE64.decode(file.public_key).context("trust root public_key is not base64")?;

    let private_key = PrivateKey::deserialize(&private_bytes).context("malformed trust root private key")?;
    let public_key = PublicKey::deserialize(&public_bytes).context("malformed trust root public key")?;

    Ok(TrustRoot { private_key, public_key })
}

fn load_zk_params(path: &Path) -> Result<ZkParams> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading zk params file {}", path.display()))?;
    let file: ZkParamsFile = serde_json::from_str(&raw)
        .with_context(|| format!("parsing zk params file {}", path.display()))?;

    Ok(ZkParams {
        zk_secret: BASE64.decode(file.zk_secret).context("zk_secret is not base64")?,
        zk_public: BASE64.decode(file.zk_public).context("zk_public is not base64")?,
        generic_zk_secret: BASE64
            .decode(file.generic_zk_secret)
            .context("generic_zk_secret is not base64")?,
        backup_zk_secret: BASE64
            .decode(file.backup_zk_secret)
            .context("backup_zk_secret is not base64")?,
    })
}

/// Unused but kept for parity with identity-key-pair generation elsewhere
/// (`test_utils/key.rs`); a fresh trust root can be minted the same way the
/// pre-build script would, for environments that have no `certs/` directory.
pub fn generate_trust_root() -> (IdentityKeyPair, TrustRoot) {
    let identity = IdentityKeyPair::generate(&mut rand::rngs::OsRng);
    let trust_root = TrustRoot {
        private_key: *identity.private_key(),
        public_key: *identity.identity_key().public_key(),
    };
    (identity, trust_root)
}
