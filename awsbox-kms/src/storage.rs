//! KMS in-memory storage engine
//!
//! One mutex guards the whole registry. Key material is versioned: rotation
//! appends a fresh 32-byte version and never drops old ones, so ciphertexts
//! issued under earlier versions stay decryptable. Keys scheduled for
//! deletion are purged lazily once the clock passes their deletion date.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use awsbox_core::{ArnGenerator, Clock, ErrorCode};
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use uuid::Uuid;

use crate::ciphertext::{context_hash, canonical_context, CiphertextBlob, NONCE_LEN};

pub const MAX_PLAINTEXT_BYTES: usize = 4096;
pub const MAX_RANDOM_BYTES: usize = 1024;
pub const MIN_DELETION_WINDOW_DAYS: i64 = 7;
pub const MAX_DELETION_WINDOW_DAYS: i64 = 30;

const KEY_MATERIAL_LEN: usize = 32;

pub type EncryptionContext = BTreeMap<String, String>;

/// Key state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Enabled,
    Disabled,
    PendingDeletion,
}

impl KeyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enabled => "Enabled",
            Self::Disabled => "Disabled",
            Self::PendingDeletion => "PendingDeletion",
        }
    }
}

#[derive(Debug)]
struct Key {
    key_id: String,
    arn: String,
    state: KeyState,
    description: String,
    key_usage: String,
    origin: String,
    rotation_enabled: bool,
    /// Material versions, oldest first; the last is active.
    versions: Vec<[u8; KEY_MATERIAL_LEN]>,
    created_at: DateTime<Utc>,
    deletion_date: Option<DateTime<Utc>>,
    tags: HashMap<String, String>,
}

impl Key {
    fn active_version(&self) -> (u32, &[u8; KEY_MATERIAL_LEN]) {
        let index = self.versions.len() - 1;
        (index as u32, &self.versions[index])
    }
}

/// Snapshot of a key's metadata.
#[derive(Debug, Clone)]
pub struct KeyMetadata {
    pub key_id: String,
    pub arn: String,
    pub state: KeyState,
    pub description: String,
    pub key_usage: String,
    pub origin: String,
    pub rotation_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub deletion_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct AliasEntry {
    pub name: String,
    pub arn: String,
    pub target_key_id: String,
}

#[derive(Debug)]
pub struct EncryptResult {
    pub ciphertext: Vec<u8>,
    pub key_arn: String,
}

#[derive(Debug)]
pub struct DecryptResult {
    pub plaintext: Vec<u8>,
    pub key_arn: String,
}

#[derive(Debug)]
pub struct DataKeyResult {
    pub plaintext_key: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub key_arn: String,
}

/// KMS errors
#[derive(Debug, thiserror::Error)]
pub enum KmsError {
    #[error("Key {0} not found")]
    KeyNotFound(String),

    #[error("Alias {0} not found")]
    AliasNotFound(String),

    #[error("Alias {0} already exists")]
    AliasAlreadyExists(String),

    #[error("Key {0} is {1} and cannot be used for this operation")]
    InvalidKeyState(String, &'static str),

    #[error("Ciphertext cannot be decrypted")]
    InvalidCiphertext,

    #[error("{0}")]
    InvalidArgument(String),

    #[error("Internal failure: {0}")]
    Internal(String),
}

impl KmsError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::KeyNotFound(_) | Self::AliasNotFound(_) => ErrorCode::ResourceNotFoundException,
            Self::AliasAlreadyExists(_) => ErrorCode::ResourceInUseException,
            Self::InvalidKeyState(_, _) => ErrorCode::KMSInvalidStateException,
            Self::InvalidCiphertext => ErrorCode::InvalidCiphertextException,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgumentException,
            Self::Internal(_) => ErrorCode::InternalFailure,
        }
    }
}

/// In-memory KMS engine
pub struct KmsStorage {
    arn: ArnGenerator,
    clock: Clock,
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    keys: HashMap<String, Key>,
    /// `alias/<name>` -> key id
    aliases: BTreeMap<String, String>,
}

impl KmsStorage {
    pub fn new(arn: ArnGenerator) -> Self {
        Self::with_clock(arn, Clock::system())
    }

    pub fn with_clock(arn: ArnGenerator, clock: Clock) -> Self {
        Self {
            arn,
            clock,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Lock the registry, dropping keys whose deletion window has passed.
    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        let mut inner = self.inner.lock().expect("kms state lock poisoned");
        let now = self.clock.now();
        let Inner { keys, aliases } = &mut *inner;
        keys.retain(|_, key| match key.deletion_date {
            Some(date) => key.state != KeyState::PendingDeletion || now < date,
            None => true,
        });
        aliases.retain(|_, key_id| keys.contains_key(key_id));
        inner
    }

    // === Key lifecycle ===

    pub fn create_key(
        &self,
        description: Option<String>,
        key_usage: Option<String>,
        tags: HashMap<String, String>,
    ) -> Result<KeyMetadata, KmsError> {
        let key_usage = key_usage.unwrap_or_else(|| "ENCRYPT_DECRYPT".to_string());
        if key_usage != "ENCRYPT_DECRYPT" && key_usage != "GENERATE_VERIFY_MAC" {
            return Err(KmsError::InvalidArgument(format!(
                "Unsupported KeyUsage: {}",
                key_usage
            )));
        }

        let key_id = Uuid::new_v4().to_string();
        let key = Key {
            arn: self.arn.generate("kms", "key", &key_id),
            key_id: key_id.clone(),
            state: KeyState::Enabled,
            description: description.unwrap_or_default(),
            key_usage,
            origin: "AWS_KMS".to_string(),
            rotation_enabled: false,
            versions: vec![random_material()],
            created_at: self.clock.now(),
            deletion_date: None,
            tags,
        };
        let metadata = metadata(&key);

        self.lock().keys.insert(key_id, key);
        Ok(metadata)
    }

    pub fn describe_key(&self, key_ref: &str) -> Result<KeyMetadata, KmsError> {
        let inner = self.lock();
        resolve(&inner, key_ref).map(metadata)
    }

    pub fn list_keys(&self) -> Vec<(String, String)> {
        let inner = self.lock();
        let mut keys: Vec<(String, String)> = inner
            .keys
            .values()
            .map(|k| (k.key_id.clone(), k.arn.clone()))
            .collect();
        keys.sort();
        keys
    }

    pub fn enable_key(&self, key_ref: &str) -> Result<(), KmsError> {
        self.set_enabled(key_ref, true)
    }

    pub fn disable_key(&self, key_ref: &str) -> Result<(), KmsError> {
        self.set_enabled(key_ref, false)
    }

    fn set_enabled(&self, key_ref: &str, enabled: bool) -> Result<(), KmsError> {
        let mut inner = self.lock();
        let key = resolve_mut(&mut inner, key_ref)?;
        if key.state == KeyState::PendingDeletion {
            return Err(KmsError::InvalidKeyState(
                key.key_id.clone(),
                "pending deletion",
            ));
        }
        key.state = if enabled {
            KeyState::Enabled
        } else {
            KeyState::Disabled
        };
        Ok(())
    }

    pub fn schedule_key_deletion(
        &self,
        key_ref: &str,
        pending_window_days: Option<i64>,
    ) -> Result<(String, DateTime<Utc>), KmsError> {
        let days = pending_window_days
            .unwrap_or(MAX_DELETION_WINDOW_DAYS)
            .clamp(MIN_DELETION_WINDOW_DAYS, MAX_DELETION_WINDOW_DAYS);
        let deletion_date = self.clock.now() + Duration::days(days);

        let mut inner = self.lock();
        let key = resolve_mut(&mut inner, key_ref)?;
        key.state = KeyState::PendingDeletion;
        key.deletion_date = Some(deletion_date);
        Ok((key.arn.clone(), deletion_date))
    }

    pub fn cancel_key_deletion(&self, key_ref: &str) -> Result<String, KmsError> {
        let mut inner = self.lock();
        let key = resolve_mut(&mut inner, key_ref)?;
        if key.state != KeyState::PendingDeletion {
            return Err(KmsError::InvalidKeyState(key.key_id.clone(), "not pending"));
        }
        key.state = KeyState::Disabled;
        key.deletion_date = None;
        Ok(key.arn.clone())
    }

    // === Rotation ===

    pub fn enable_rotation(&self, key_ref: &str) -> Result<(), KmsError> {
        self.set_rotation(key_ref, true)
    }

    pub fn disable_rotation(&self, key_ref: &str) -> Result<(), KmsError> {
        self.set_rotation(key_ref, false)
    }

    fn set_rotation(&self, key_ref: &str, enabled: bool) -> Result<(), KmsError> {
        let mut inner = self.lock();
        let key = resolve_mut(&mut inner, key_ref)?;
        if key.state == KeyState::PendingDeletion {
            return Err(KmsError::InvalidKeyState(
                key.key_id.clone(),
                "pending deletion",
            ));
        }
        key.rotation_enabled = enabled;
        Ok(())
    }

    pub fn rotation_status(&self, key_ref: &str) -> Result<bool, KmsError> {
        let inner = self.lock();
        resolve(&inner, key_ref).map(|k| k.rotation_enabled)
    }

    /// Append a fresh material version. Earlier versions remain usable for
    /// decryption.
    pub fn rotate_key(&self, key_ref: &str) -> Result<String, KmsError> {
        let mut inner = self.lock();
        let key = resolve_mut(&mut inner, key_ref)?;
        if key.state != KeyState::Enabled {
            return Err(KmsError::InvalidKeyState(key.key_id.clone(), "not enabled"));
        }
        if !key.rotation_enabled {
            return Err(KmsError::InvalidArgument(format!(
                "Rotation is not enabled for key {}",
                key.key_id
            )));
        }
        key.versions.push(random_material());
        Ok(key.arn.clone())
    }

    // === Aliases ===

    pub fn create_alias(&self, alias_name: &str, key_ref: &str) -> Result<(), KmsError> {
        validate_alias_name(alias_name)?;
        let mut inner = self.lock();
        if inner.aliases.contains_key(alias_name) {
            return Err(KmsError::AliasAlreadyExists(alias_name.to_string()));
        }
        let key_id = resolve(&inner, key_ref)?.key_id.clone();
        inner.aliases.insert(alias_name.to_string(), key_id);
        Ok(())
    }

    pub fn update_alias(&self, alias_name: &str, key_ref: &str) -> Result<(), KmsError> {
        validate_alias_name(alias_name)?;
        let mut inner = self.lock();
        if !inner.aliases.contains_key(alias_name) {
            return Err(KmsError::AliasNotFound(alias_name.to_string()));
        }
        let key_id = resolve(&inner, key_ref)?.key_id.clone();
        inner.aliases.insert(alias_name.to_string(), key_id);
        Ok(())
    }

    pub fn delete_alias(&self, alias_name: &str) -> Result<(), KmsError> {
        self.lock()
            .aliases
            .remove(alias_name)
            .map(|_| ())
            .ok_or_else(|| KmsError::AliasNotFound(alias_name.to_string()))
    }

    pub fn list_aliases(&self) -> Vec<AliasEntry> {
        let inner = self.lock();
        inner
            .aliases
            .iter()
            .map(|(name, key_id)| AliasEntry {
                name: name.clone(),
                arn: self.arn.generate("kms", "alias", name.trim_start_matches("alias/")),
                target_key_id: key_id.clone(),
            })
            .collect()
    }

    // === Tags ===

    pub fn tag_key(
        &self,
        key_ref: &str,
        tags: HashMap<String, String>,
    ) -> Result<(), KmsError> {
        let mut inner = self.lock();
        let key = resolve_mut(&mut inner, key_ref)?;
        key.tags.extend(tags);
        Ok(())
    }

    pub fn untag_key(&self, key_ref: &str, keys: &[String]) -> Result<(), KmsError> {
        let mut inner = self.lock();
        let key = resolve_mut(&mut inner, key_ref)?;
        for k in keys {
            key.tags.remove(k);
        }
        Ok(())
    }

    pub fn list_tags(&self, key_ref: &str) -> Result<Vec<(String, String)>, KmsError> {
        let inner = self.lock();
        let key = resolve(&inner, key_ref)?;
        let mut tags: Vec<(String, String)> = key
            .tags
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        tags.sort();
        Ok(tags)
    }

    // === Envelope encryption ===

    pub fn encrypt(
        &self,
        key_ref: &str,
        plaintext: &[u8],
        context: &EncryptionContext,
    ) -> Result<EncryptResult, KmsError> {
        if plaintext.is_empty() || plaintext.len() > MAX_PLAINTEXT_BYTES {
            return Err(KmsError::InvalidArgument(format!(
                "Plaintext must be between 1 and {} bytes",
                MAX_PLAINTEXT_BYTES
            )));
        }

        let inner = self.lock();
        let key = resolve(&inner, key_ref)?;
        let result = encrypt_under(key, plaintext, context)?;
        Ok(result)
    }

    pub fn decrypt(
        &self,
        blob: &[u8],
        context: &EncryptionContext,
    ) -> Result<DecryptResult, KmsError> {
        let parsed = CiphertextBlob::decode(blob).ok_or(KmsError::InvalidCiphertext)?;

        let inner = self.lock();
        // The blob names its own key; any caller-supplied hint is ignored.
        let key = inner
            .keys
            .get(&parsed.key_id)
            .ok_or(KmsError::InvalidCiphertext)?;
        if key.state == KeyState::PendingDeletion {
            return Err(KmsError::InvalidKeyState(
                key.key_id.clone(),
                "pending deletion",
            ));
        }
        let material = key
            .versions
            .get(parsed.version_index as usize)
            .ok_or(KmsError::InvalidCiphertext)?;

        if parsed.aad_hash != context_hash(context) {
            return Err(KmsError::InvalidCiphertext);
        }

        let cipher = Aes256Gcm::new_from_slice(material)
            .map_err(|e| KmsError::Internal(e.to_string()))?;
        let aad = canonical_context(context);
        let plaintext = cipher
            .decrypt(
                Nonce::from_slice(&parsed.nonce),
                Payload {
                    msg: &parsed.ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| KmsError::InvalidCiphertext)?;

        Ok(DecryptResult {
            plaintext,
            key_arn: key.arn.clone(),
        })
    }

    pub fn re_encrypt(
        &self,
        blob: &[u8],
        source_context: &EncryptionContext,
        destination_key_ref: &str,
        destination_context: &EncryptionContext,
    ) -> Result<(EncryptResult, String), KmsError> {
        let decrypted = self.decrypt(blob, source_context)?;
        let encrypted = self.encrypt(
            destination_key_ref,
            &decrypted.plaintext,
            destination_context,
        )?;
        Ok((encrypted, decrypted.key_arn))
    }

    pub fn generate_data_key(
        &self,
        key_ref: &str,
        number_of_bytes: usize,
        context: &EncryptionContext,
    ) -> Result<DataKeyResult, KmsError> {
        if number_of_bytes == 0 || number_of_bytes > MAX_RANDOM_BYTES {
            return Err(KmsError::InvalidArgument(format!(
                "NumberOfBytes must be between 1 and {}",
                MAX_RANDOM_BYTES
            )));
        }

        let mut data_key = vec![0u8; number_of_bytes];
        rand::thread_rng().fill_bytes(&mut data_key);

        let inner = self.lock();
        let key = resolve(&inner, key_ref)?;
        let encrypted = encrypt_under(key, &data_key, context)?;

        Ok(DataKeyResult {
            plaintext_key: data_key,
            ciphertext: encrypted.ciphertext,
            key_arn: encrypted.key_arn,
        })
    }

    pub fn generate_random(&self, number_of_bytes: usize) -> Result<Vec<u8>, KmsError> {
        if number_of_bytes == 0 || number_of_bytes > MAX_RANDOM_BYTES {
            return Err(KmsError::InvalidArgument(format!(
                "NumberOfBytes must be between 1 and {}",
                MAX_RANDOM_BYTES
            )));
        }
        let mut bytes = vec![0u8; number_of_bytes];
        rand::thread_rng().fill_bytes(&mut bytes);
        Ok(bytes)
    }
}

// === Free helpers (operate on locked state) ===

/// Resolve a key reference: bare key id, key ARN, `alias/<name>`, or alias
/// ARN.
fn resolve<'a>(inner: &'a Inner, key_ref: &str) -> Result<&'a Key, KmsError> {
    let key_id = resolve_id(inner, key_ref)?;
    inner
        .keys
        .get(&key_id)
        .ok_or_else(|| KmsError::KeyNotFound(key_ref.to_string()))
}

fn resolve_mut<'a>(inner: &'a mut Inner, key_ref: &str) -> Result<&'a mut Key, KmsError> {
    let key_id = resolve_id(inner, key_ref)?;
    inner
        .keys
        .get_mut(&key_id)
        .ok_or_else(|| KmsError::KeyNotFound(key_ref.to_string()))
}

fn resolve_id(inner: &Inner, key_ref: &str) -> Result<String, KmsError> {
    // ARN forms reduce to their trailing `key/<id>` or `alias/<name>` part.
    let suffix = match key_ref.strip_prefix("arn:aws:kms:") {
        Some(rest) => rest
            .rsplit_once(':')
            .map(|(_, resource)| resource)
            .unwrap_or(rest),
        None => key_ref,
    };

    if let Some(alias_name) = suffix.strip_prefix("alias/") {
        let full = format!("alias/{}", alias_name);
        return inner
            .aliases
            .get(&full)
            .cloned()
            .ok_or(KmsError::AliasNotFound(full));
    }
    Ok(suffix.strip_prefix("key/").unwrap_or(suffix).to_string())
}

fn validate_alias_name(alias_name: &str) -> Result<(), KmsError> {
    if !alias_name.starts_with("alias/") {
        return Err(KmsError::InvalidArgument(format!(
            "Alias name {} must start with alias/",
            alias_name
        )));
    }
    if alias_name.starts_with("alias/aws/") {
        return Err(KmsError::InvalidArgument(
            "Alias names beginning alias/aws/ are reserved".to_string(),
        ));
    }
    Ok(())
}

fn encrypt_under(
    key: &Key,
    plaintext: &[u8],
    context: &EncryptionContext,
) -> Result<EncryptResult, KmsError> {
    match key.state {
        KeyState::Enabled => {}
        KeyState::Disabled => {
            return Err(KmsError::InvalidKeyState(key.key_id.clone(), "disabled"))
        }
        KeyState::PendingDeletion => {
            return Err(KmsError::InvalidKeyState(
                key.key_id.clone(),
                "pending deletion",
            ))
        }
    }

    let (version_index, material) = key.active_version();
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);

    let cipher =
        Aes256Gcm::new_from_slice(material).map_err(|e| KmsError::Internal(e.to_string()))?;
    let aad = canonical_context(context);
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad: &aad,
            },
        )
        .map_err(|e| KmsError::Internal(e.to_string()))?;

    let blob = CiphertextBlob {
        key_id: key.key_id.clone(),
        version_index,
        nonce,
        aad_hash: context_hash(context),
        ciphertext,
    };

    Ok(EncryptResult {
        ciphertext: blob.encode(),
        key_arn: key.arn.clone(),
    })
}

fn random_material() -> [u8; KEY_MATERIAL_LEN] {
    let mut material = [0u8; KEY_MATERIAL_LEN];
    rand::thread_rng().fill_bytes(&mut material);
    material
}

fn metadata(key: &Key) -> KeyMetadata {
    KeyMetadata {
        key_id: key.key_id.clone(),
        arn: key.arn.clone(),
        state: key.state,
        description: key.description.clone(),
        key_usage: key.key_usage.clone(),
        origin: key.origin.clone(),
        rotation_enabled: key.rotation_enabled,
        created_at: key.created_at,
        deletion_date: key.deletion_date,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage() -> KmsStorage {
        KmsStorage::new(ArnGenerator::default())
    }

    fn storage_with_clock(clock: Clock) -> KmsStorage {
        KmsStorage::with_clock(ArnGenerator::default(), clock)
    }

    fn context(pairs: &[(&str, &str)]) -> EncryptionContext {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn create_key(storage: &KmsStorage) -> KeyMetadata {
        storage.create_key(None, None, HashMap::new()).unwrap()
    }

    // === Key lifecycle ===

    #[test]
    fn test_create_and_describe_key() {
        let storage = storage();
        let created = create_key(&storage);

        assert_eq!(created.state, KeyState::Enabled);
        assert_eq!(created.key_usage, "ENCRYPT_DECRYPT");
        assert_eq!(
            created.arn,
            format!("arn:aws:kms:us-east-1:12345:key/{}", created.key_id)
        );

        let described = storage.describe_key(&created.key_id).unwrap();
        assert_eq!(described.key_id, created.key_id);

        // Lookup by ARN works too.
        let by_arn = storage.describe_key(&created.arn).unwrap();
        assert_eq!(by_arn.key_id, created.key_id);
    }

    #[test]
    fn test_unknown_key_usage_rejected() {
        let storage = storage();
        let result = storage.create_key(None, Some("SIGN_VERIFY".to_string()), HashMap::new());
        assert!(matches!(result, Err(KmsError::InvalidArgument(_))));
    }

    #[test]
    fn test_enable_disable_cycle() {
        let storage = storage();
        let key = create_key(&storage);

        storage.disable_key(&key.key_id).unwrap();
        assert_eq!(
            storage.describe_key(&key.key_id).unwrap().state,
            KeyState::Disabled
        );

        storage.enable_key(&key.key_id).unwrap();
        assert_eq!(
            storage.describe_key(&key.key_id).unwrap().state,
            KeyState::Enabled
        );
    }

    // === Encrypt / Decrypt ===

    #[test]
    fn test_encrypt_decrypt_round_trip() {
        let storage = storage();
        let key = create_key(&storage);
        let ctx = context(&[("u", "1")]);

        let encrypted = storage.encrypt(&key.key_id, b"hello", &ctx).unwrap();
        assert_ne!(encrypted.ciphertext, b"hello");

        let decrypted = storage.decrypt(&encrypted.ciphertext, &ctx).unwrap();
        assert_eq!(decrypted.plaintext, b"hello");
        assert_eq!(decrypted.key_arn, key.arn);
    }

    #[test]
    fn test_decrypt_with_wrong_context_fails() {
        let storage = storage();
        let key = create_key(&storage);

        let encrypted = storage
            .encrypt(&key.key_id, b"hello", &context(&[("u", "1")]))
            .unwrap();

        assert!(matches!(
            storage.decrypt(&encrypted.ciphertext, &context(&[("u", "2")])),
            Err(KmsError::InvalidCiphertext)
        ));
        assert!(matches!(
            storage.decrypt(&encrypted.ciphertext, &EncryptionContext::new()),
            Err(KmsError::InvalidCiphertext)
        ));
    }

    #[test]
    fn test_decrypt_garbage_fails() {
        let storage = storage();
        assert!(matches!(
            storage.decrypt(b"not-a-blob", &EncryptionContext::new()),
            Err(KmsError::InvalidCiphertext)
        ));
    }

    #[test]
    fn test_decrypt_tampered_ciphertext_fails() {
        let storage = storage();
        let key = create_key(&storage);
        let ctx = EncryptionContext::new();

        let mut blob = storage.encrypt(&key.key_id, b"payload", &ctx).unwrap().ciphertext;
        let last = blob.len() - 1;
        blob[last] ^= 0x01;

        assert!(matches!(
            storage.decrypt(&blob, &ctx),
            Err(KmsError::InvalidCiphertext)
        ));
    }

    #[test]
    fn test_encrypt_requires_enabled_key() {
        let storage = storage();
        let key = create_key(&storage);
        storage.disable_key(&key.key_id).unwrap();

        assert!(matches!(
            storage.encrypt(&key.key_id, b"p", &EncryptionContext::new()),
            Err(KmsError::InvalidKeyState(_, _))
        ));
    }

    #[test]
    fn test_disabled_key_still_decrypts() {
        let storage = storage();
        let key = create_key(&storage);
        let ctx = EncryptionContext::new();
        let encrypted = storage.encrypt(&key.key_id, b"p", &ctx).unwrap();

        storage.disable_key(&key.key_id).unwrap();
        let decrypted = storage.decrypt(&encrypted.ciphertext, &ctx).unwrap();
        assert_eq!(decrypted.plaintext, b"p");
    }

    #[test]
    fn test_plaintext_size_limit() {
        let storage = storage();
        let key = create_key(&storage);

        assert!(storage
            .encrypt(&key.key_id, &[0u8; MAX_PLAINTEXT_BYTES], &EncryptionContext::new())
            .is_ok());
        assert!(matches!(
            storage.encrypt(
                &key.key_id,
                &[0u8; MAX_PLAINTEXT_BYTES + 1],
                &EncryptionContext::new()
            ),
            Err(KmsError::InvalidArgument(_))
        ));
    }

    // === Aliases ===

    #[test]
    fn test_alias_resolution() {
        let storage = storage();
        let key = create_key(&storage);
        storage.create_alias("alias/app", &key.key_id).unwrap();

        let ctx = EncryptionContext::new();
        let encrypted = storage.encrypt("alias/app", b"via-alias", &ctx).unwrap();
        assert_eq!(encrypted.key_arn, key.arn);

        let described = storage.describe_key("alias/app").unwrap();
        assert_eq!(described.key_id, key.key_id);
    }

    #[test]
    fn test_alias_rules() {
        let storage = storage();
        let key = create_key(&storage);

        assert!(matches!(
            storage.create_alias("no-prefix", &key.key_id),
            Err(KmsError::InvalidArgument(_))
        ));
        assert!(matches!(
            storage.create_alias("alias/aws/reserved", &key.key_id),
            Err(KmsError::InvalidArgument(_))
        ));

        storage.create_alias("alias/app", &key.key_id).unwrap();
        assert!(matches!(
            storage.create_alias("alias/app", &key.key_id),
            Err(KmsError::AliasAlreadyExists(_))
        ));

        let other = create_key(&storage);
        storage.update_alias("alias/app", &other.key_id).unwrap();
        assert_eq!(
            storage.describe_key("alias/app").unwrap().key_id,
            other.key_id
        );

        storage.delete_alias("alias/app").unwrap();
        assert!(matches!(
            storage.delete_alias("alias/app"),
            Err(KmsError::AliasNotFound(_))
        ));
    }

    // === Rotation ===

    #[test]
    fn test_rotation_keeps_old_ciphertexts_decryptable() {
        let storage = storage();
        let key = create_key(&storage);
        storage.create_alias("alias/x", &key.key_id).unwrap();
        let ctx = EncryptionContext::new();

        let before = storage.encrypt("alias/x", b"p", &ctx).unwrap();

        storage.enable_rotation(&key.key_id).unwrap();
        assert!(storage.rotation_status(&key.key_id).unwrap());
        storage.rotate_key(&key.key_id).unwrap();

        let after = storage.encrypt("alias/x", b"p", &ctx).unwrap();

        // Different material version, both decryptable.
        assert_ne!(before.ciphertext, after.ciphertext);
        assert_eq!(storage.decrypt(&before.ciphertext, &ctx).unwrap().plaintext, b"p");
        assert_eq!(storage.decrypt(&after.ciphertext, &ctx).unwrap().plaintext, b"p");
    }

    #[test]
    fn test_rotate_requires_rotation_enabled() {
        let storage = storage();
        let key = create_key(&storage);
        assert!(matches!(
            storage.rotate_key(&key.key_id),
            Err(KmsError::InvalidArgument(_))
        ));
    }

    // === Deletion window ===

    #[test]
    fn test_schedule_and_cancel_deletion() {
        let clock = Clock::manual(Utc::now());
        let storage = storage_with_clock(clock.clone());
        let key = create_key(&storage);
        let ctx = EncryptionContext::new();
        let encrypted = storage.encrypt(&key.key_id, b"p", &ctx).unwrap();

        let (_, deletion_date) = storage
            .schedule_key_deletion(&key.key_id, Some(7))
            .unwrap();
        assert_eq!(deletion_date, clock.now() + Duration::days(7));

        // Encrypt refuses, decrypt still works during the window.
        assert!(matches!(
            storage.encrypt(&key.key_id, b"p", &ctx),
            Err(KmsError::InvalidKeyState(_, _))
        ));
        assert_eq!(storage.decrypt(&encrypted.ciphertext, &ctx).unwrap().plaintext, b"p");

        storage.cancel_key_deletion(&key.key_id).unwrap();
        assert_eq!(
            storage.describe_key(&key.key_id).unwrap().state,
            KeyState::Disabled
        );
    }

    #[test]
    fn test_deletion_window_clamped() {
        let clock = Clock::manual(Utc::now());
        let storage = storage_with_clock(clock.clone());
        let key = create_key(&storage);

        let (_, date) = storage.schedule_key_deletion(&key.key_id, Some(1)).unwrap();
        assert_eq!(date, clock.now() + Duration::days(MIN_DELETION_WINDOW_DAYS));

        storage.cancel_key_deletion(&key.key_id).unwrap();
        let (_, date) = storage
            .schedule_key_deletion(&key.key_id, Some(90))
            .unwrap();
        assert_eq!(date, clock.now() + Duration::days(MAX_DELETION_WINDOW_DAYS));
    }

    #[test]
    fn test_key_purged_after_deletion_window() {
        let clock = Clock::manual(Utc::now());
        let storage = storage_with_clock(clock.clone());
        let key = create_key(&storage);
        storage.create_alias("alias/doomed", &key.key_id).unwrap();
        let ctx = EncryptionContext::new();
        let encrypted = storage.encrypt(&key.key_id, b"p", &ctx).unwrap();

        storage.schedule_key_deletion(&key.key_id, Some(7)).unwrap();
        clock.advance(Duration::days(8));

        // Key material is gone: the blob no longer resolves.
        assert!(matches!(
            storage.decrypt(&encrypted.ciphertext, &ctx),
            Err(KmsError::InvalidCiphertext)
        ));
        assert!(matches!(
            storage.describe_key(&key.key_id),
            Err(KmsError::KeyNotFound(_))
        ));
        assert!(storage.list_aliases().is_empty());
    }

    // === Data keys and randomness ===

    #[test]
    fn test_generate_data_key_round_trip() {
        let storage = storage();
        let key = create_key(&storage);
        let ctx = context(&[("purpose", "envelope")]);

        let data_key = storage.generate_data_key(&key.key_id, 32, &ctx).unwrap();
        assert_eq!(data_key.plaintext_key.len(), 32);

        let decrypted = storage.decrypt(&data_key.ciphertext, &ctx).unwrap();
        assert_eq!(decrypted.plaintext, data_key.plaintext_key);
    }

    #[test]
    fn test_generate_random_bounds() {
        let storage = storage();
        assert_eq!(storage.generate_random(16).unwrap().len(), 16);
        assert!(matches!(
            storage.generate_random(0),
            Err(KmsError::InvalidArgument(_))
        ));
        assert!(matches!(
            storage.generate_random(MAX_RANDOM_BYTES + 1),
            Err(KmsError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_re_encrypt_moves_between_keys() {
        let storage = storage();
        let source = create_key(&storage);
        let destination = create_key(&storage);
        let source_ctx = context(&[("from", "a")]);
        let destination_ctx = context(&[("to", "b")]);

        let encrypted = storage.encrypt(&source.key_id, b"p", &source_ctx).unwrap();
        let (re_encrypted, source_arn) = storage
            .re_encrypt(
                &encrypted.ciphertext,
                &source_ctx,
                &destination.key_id,
                &destination_ctx,
            )
            .unwrap();

        assert_eq!(source_arn, source.arn);
        assert_eq!(re_encrypted.key_arn, destination.arn);

        let decrypted = storage
            .decrypt(&re_encrypted.ciphertext, &destination_ctx)
            .unwrap();
        assert_eq!(decrypted.plaintext, b"p");
        assert_eq!(decrypted.key_arn, destination.arn);
    }

    // === Tags ===

    #[test]
    fn test_tag_round_trip() {
        let storage = storage();
        let key = create_key(&storage);

        let mut tags = HashMap::new();
        tags.insert("env".to_string(), "test".to_string());
        storage.tag_key(&key.key_id, tags).unwrap();

        assert_eq!(
            storage.list_tags(&key.key_id).unwrap(),
            vec![("env".to_string(), "test".to_string())]
        );

        storage.untag_key(&key.key_id, &["env".to_string()]).unwrap();
        assert!(storage.list_tags(&key.key_id).unwrap().is_empty());
    }
}
