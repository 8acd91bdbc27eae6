//! RSA signing key management with hot reload and overlap-aware validation.
//!
//! Keys live on disk as PEM pairs plus a JSON manifest describing versions
//! and lifetimes. The in-memory key set is swapped atomically (a single
//! reference assignment under a write lock) so concurrent readers never
//! observe a torn set. Tokens are always signed with the newest active key;
//! validation accepts every key that has not yet expired, which is what keeps
//! tokens minted just before a rotation verifiable through the overlap
//! window.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey};
use parking_lot::RwLock;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::errors::AuthError;

const MANIFEST_FILE: &str = "keyset.json";
const RSA_BITS: usize = 2048;

/// A signing key with its PEM material and lifecycle metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtKey {
    pub version: Uuid,
    pub private_pem: String,
    pub public_pem: String,
    pub algorithm: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_active: bool,
}

impl JwtKey {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ManifestEntry {
    version: Uuid,
    algorithm: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    is_active: bool,
    private_pem_file: String,
    public_pem_file: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    keys: Vec<ManifestEntry>,
}

struct LoadedKey {
    key: JwtKey,
    encoding: EncodingKey,
    decoding: DecodingKey,
}

struct KeySet {
    keys: Vec<LoadedKey>,
}

/// Manages the RSA keypairs used for RS256 token signing.
pub struct KeyManager {
    key_dir: PathBuf,
    /// Total key lifetime: rotation interval plus overlap window.
    key_lifetime: Duration,
    state: RwLock<Arc<KeySet>>,
    watcher: parking_lot::Mutex<Option<WatchGuard>>,
}

struct WatchGuard {
    _watcher: notify::RecommendedWatcher,
    task: tokio::task::JoinHandle<()>,
}

impl KeyManager {
    /// Load the key set from `key_dir`, generating an initial keypair when
    /// the directory is empty. A corrupt manifest or unreadable PEM at this
    /// point is fatal: a node without signing keys must not come up.
    pub fn load(key_dir: impl Into<PathBuf>, key_lifetime: Duration) -> Result<Arc<Self>> {
        let key_dir = key_dir.into();
        std::fs::create_dir_all(&key_dir)
            .with_context(|| format!("failed to create key directory {}", key_dir.display()))?;

        let manager = Arc::new(Self {
            key_dir: key_dir.clone(),
            key_lifetime,
            state: RwLock::new(Arc::new(KeySet { keys: Vec::new() })),
            watcher: parking_lot::Mutex::new(None),
        });

        if key_dir.join(MANIFEST_FILE).exists() {
            let set = manager.read_keyset_from_disk()?;
            if set.keys.is_empty() {
                anyhow::bail!("key manifest {} contains no keys", key_dir.display());
            }
            *manager.state.write() = Arc::new(set);
            info!(dir = %key_dir.display(), "signing keys loaded");
        } else {
            let version = manager.rotate(Utc::now())?;
            info!(%version, dir = %key_dir.display(), "bootstrapped initial signing key");
        }
        Ok(manager)
    }

    /// Newest active, non-expired signing key.
    pub fn current_signing_key(&self) -> Result<(Uuid, EncodingKey), AuthError> {
        let now = Utc::now();
        let set = self.state.read().clone();
        set.keys
            .iter()
            .filter(|loaded| loaded.key.is_active && !loaded.key.is_expired(now))
            .max_by_key(|loaded| loaded.key.created_at)
            .map(|loaded| (loaded.key.version, loaded.encoding.clone()))
            .ok_or_else(|| AuthError::KeyUnavailable("no active signing key".into()))
    }

    /// Public halves of every non-expired key, newest first. Tokens minted
    /// under a superseded key verify against these until the key expires.
    pub fn active_public_keys(&self) -> Vec<(Uuid, DecodingKey)> {
        let now = Utc::now();
        let set = self.state.read().clone();
        let mut keys: Vec<(DateTime<Utc>, Uuid, DecodingKey)> = set
            .keys
            .iter()
            .filter(|loaded| !loaded.key.is_expired(now))
            .map(|loaded| (loaded.key.created_at, loaded.key.version, loaded.decoding.clone()))
            .collect();
        keys.sort_by(|a, b| b.0.cmp(&a.0));
        keys.into_iter().map(|(_, version, key)| (version, key)).collect()
    }

    /// Metadata snapshot of every loaded key (PEM material excluded).
    pub fn key_metadata(&self) -> Vec<JwtKey> {
        let set = self.state.read().clone();
        set.keys
            .iter()
            .map(|loaded| JwtKey {
                private_pem: String::new(),
                ..loaded.key.clone()
            })
            .collect()
    }

    /// Generate, persist, and activate a fresh keypair; deactivate keys past
    /// their lifetime. Disk state is written first and the in-memory set is
    /// swapped only after every write succeeded, so a failed persist leaves
    /// the running node on its previous keys.
    pub fn rotate(&self, now: DateTime<Utc>) -> Result<Uuid> {
        let version = Uuid::new_v4();
        let (private_pem, public_pem) = generate_rsa_pem_pair()?;
        let new_key = JwtKey {
            version,
            private_pem,
            public_pem,
            algorithm: "RS256".into(),
            created_at: now,
            expires_at: now + self.key_lifetime,
            is_active: true,
        };

        let mut manifest = self.read_manifest().unwrap_or_default();
        // Retire keys that have lived out interval + overlap; anything
        // younger stays loaded so in-flight tokens keep verifying.
        manifest.keys.retain(|entry| entry.expires_at > now);
        for entry in &mut manifest.keys {
            entry.is_active = false;
        }

        let private_file = format!("jwt_private_{version}.pem");
        let public_file = format!("jwt_public_{version}.pem");
        write_atomic(&self.key_dir.join(&private_file), new_key.private_pem.as_bytes())?;
        write_atomic(&self.key_dir.join(&public_file), new_key.public_pem.as_bytes())?;

        manifest.keys.push(ManifestEntry {
            version,
            algorithm: new_key.algorithm.clone(),
            created_at: new_key.created_at,
            expires_at: new_key.expires_at,
            is_active: true,
            private_pem_file: private_file,
            public_pem_file: public_file,
        });
        write_atomic(
            &self.key_dir.join(MANIFEST_FILE),
            serde_json::to_string_pretty(&manifest)?.as_bytes(),
        )?;

        let set = self.read_keyset_from_disk()?;
        *self.state.write() = Arc::new(set);
        info!(%version, expires_at = %new_key.expires_at, "signing key rotated");
        Ok(version)
    }

    /// Re-read keys from disk. An unreadable manifest or PEM keeps the
    /// previously loaded set so validation continues uninterrupted.
    pub fn reload(&self) -> Result<()> {
        match self.read_keyset_from_disk() {
            Ok(set) if !set.keys.is_empty() => {
                *self.state.write() = Arc::new(set);
                info!("signing keys reloaded from disk");
                Ok(())
            }
            Ok(_) => {
                warn!("key reload produced an empty set; retaining previous keys");
                anyhow::bail!("empty key set on reload");
            }
            Err(err) => {
                warn!(error = %err, "key reload failed; retaining previous keys");
                Err(err)
            }
        }
    }

    /// Watch the key directory and reload on modification.
    pub fn watch(self: &Arc<Self>) -> Result<()> {
        use notify::{RecursiveMode, Watcher};

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<()>();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                if event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove() {
                    let _ = tx.send(());
                }
            }
        })
        .context("failed to create key directory watcher")?;
        watcher
            .watch(&self.key_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("failed to watch {}", self.key_dir.display()))?;

        let manager = Arc::clone(self);
        let task = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                // Coalesce bursts of events from a single rotation.
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                while rx.try_recv().is_ok() {}
                if let Err(err) = manager.reload() {
                    error!(error = %err, "hot reload of signing keys failed");
                }
            }
        });

        *self.watcher.lock() = Some(WatchGuard {
            _watcher: watcher,
            task,
        });
        Ok(())
    }

    /// Stop the filesystem watcher, if running.
    pub fn stop(&self) {
        if let Some(guard) = self.watcher.lock().take() {
            guard.task.abort();
        }
    }

    fn read_manifest(&self) -> Result<Manifest> {
        let path = self.key_dir.join(MANIFEST_FILE);
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        serde_json::from_str(&raw).with_context(|| format!("corrupt key manifest {}", path.display()))
    }

    fn read_keyset_from_disk(&self) -> Result<KeySet> {
        let manifest = self.read_manifest()?;
        let mut keys = Vec::with_capacity(manifest.keys.len());
        for entry in manifest.keys {
            let private_pem =
                std::fs::read_to_string(self.key_dir.join(&entry.private_pem_file))
                    .with_context(|| format!("failed to read {}", entry.private_pem_file))?;
            let public_pem = std::fs::read_to_string(self.key_dir.join(&entry.public_pem_file))
                .with_context(|| format!("failed to read {}", entry.public_pem_file))?;
            let encoding = EncodingKey::from_rsa_pem(private_pem.as_bytes())
                .with_context(|| format!("invalid private PEM for key {}", entry.version))?;
            let decoding = DecodingKey::from_rsa_pem(public_pem.as_bytes())
                .with_context(|| format!("invalid public PEM for key {}", entry.version))?;
            keys.push(LoadedKey {
                key: JwtKey {
                    version: entry.version,
                    private_pem,
                    public_pem,
                    algorithm: entry.algorithm,
                    created_at: entry.created_at,
                    expires_at: entry.expires_at,
                    is_active: entry.is_active,
                },
                encoding,
                decoding,
            });
        }
        Ok(KeySet { keys })
    }
}

fn generate_rsa_pem_pair() -> Result<(String, String)> {
    let mut rng = rand::rngs::OsRng;
    let private = RsaPrivateKey::new(&mut rng, RSA_BITS).context("RSA key generation failed")?;
    let public = RsaPublicKey::from(&private);
    let private_pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .context("failed to encode private key")?
        .to_string();
    let public_pem = public
        .to_public_key_pem(LineEnding::LF)
        .context("failed to encode public key")?;
    Ok((private_pem, public_pem))
}

fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, contents)
        .with_context(|| format!("failed to write {}", tmp.display()))?;
    std::fs::rename(&tmp, path)
        .with_context(|| format!("failed to rename {} into place", tmp.display()))?;
    Ok(())
}
