pub mod channel;
pub mod gateway;
pub mod messages;
pub mod send;
pub mod status;

use std::sync::Arc;

use wecom_relay_core::{Config, Paths, SecretCipher};
use wecom_relay_storage::SqliteStore;

/// Config file, opened database and paths shared by every command.
pub struct Context {
    pub paths: Paths,
    pub config: Config,
    pub store: Arc<SqliteStore>,
}

impl Context {
    pub fn load() -> anyhow::Result<Self> {
        let paths = Paths::new();
        let config = Config::load_or_default(&paths)?;
        let db_path = config.db_path(&paths);
        let store = SqliteStore::open(&db_path)
            .map_err(|e| anyhow::anyhow!("Failed to open {}: {}", db_path.display(), e))?;
        Ok(Self {
            paths,
            config,
            store: Arc::new(store),
        })
    }

    /// Cipher for corpsecrets and EncodingAESKeys. Fails when no encryption key is configured.
    pub fn secrets(&self) -> anyhow::Result<SecretCipher> {
        let key = self.config.encryption_key()?;
        Ok(SecretCipher::new(&key)?)
    }
}
