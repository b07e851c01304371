use std::{
    fs, io,
    path::PathBuf,
    sync::{Arc, RwLock},
};

use aes_gcm::{
    Aes256Gcm,
    aead::{Aead, AeadCore, KeyInit, OsRng, generic_array::GenericArray},
};
use thiserror::Error;

use crate::{Connection, connections_db};

pub type ArcCache = Arc<RwLock<AppCache>>;

const ENCRYPTION_KEY: [u8; 32] = [
    0x5d, 0x21, 0x8c, 0x47, 0xe3, 0x0a, 0x96, 0x3b, 0x7e, 0xc4, 0x12, 0xf9, 0x68, 0x2d, 0xb0, 0x53, 0x9f, 0x04, 0x7a,
    0xe1, 0x36, 0xcb, 0x58, 0x0f, 0xa2, 0x6d, 0x19, 0xf4, 0x83, 0x3e, 0xd7, 0x40,
];

const NONCE_LEN: usize = 12;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),
}

/// 加密保存的连接列表，文件格式为 nonce(12 字节) + 密文
pub struct AppCache {
    connections: Vec<Connection>,
    path: PathBuf,
}

impl AppCache {
    pub fn init() -> Result<ArcCache, CacheError> {
        let cache = Self::open(connections_db())?;
        Ok(Arc::new(RwLock::new(cache)))
    }

    pub fn open(path: PathBuf) -> Result<Self, CacheError> {
        let connections = if path.exists() {
            let encrypted = fs::read(&path)?;
            let decrypted = Self::decrypt(&encrypted)?;
            serde_json::from_slice(&decrypted)?
        } else {
            vec![]
        };

        Ok(Self { connections, path })
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    pub fn find(
        &self,
        id: &str,
    ) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id == id)
    }

    /// 新增或按 id 覆盖连接
    pub fn upsert(
        &mut self,
        connection: Connection,
    ) {
        match self.connections.iter_mut().find(|c| c.id == connection.id) {
            Some(existing) => *existing = connection,
            None => self.connections.push(connection),
        }
    }

    pub fn remove(
        &mut self,
        id: &str,
    ) -> bool {
        let before = self.connections.len();
        self.connections.retain(|c| c.id != id);
        self.connections.len() != before
    }

    pub fn save(&self) -> Result<(), CacheError> {
        let json = serde_json::to_vec(&self.connections)?;
        let encrypted = Self::encrypt(&json)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, encrypted)?;
        Ok(())
    }

    fn encrypt(data: &[u8]) -> Result<Vec<u8>, CacheError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = Aes256Gcm::new(&ENCRYPTION_KEY.into())
            .encrypt(&nonce, data)
            .map_err(|e| CacheError::Encryption(e.to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    fn decrypt(data: &[u8]) -> Result<Vec<u8>, CacheError> {
        if data.len() < NONCE_LEN {
            return Err(CacheError::Decryption("文件过短".into()));
        }
        let (nonce, ciphertext) = data.split_at(NONCE_LEN);
        Aes256Gcm::new(&ENCRYPTION_KEY.into())
            .decrypt(GenericArray::from_slice(nonce), ciphertext)
            .map_err(|e| CacheError::Decryption(e.to_string()))
    }
}
