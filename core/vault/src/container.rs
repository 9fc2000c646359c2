//! Binary container format.
//!
//! A container is the only thing that ever reaches disk. All integers are
//! little-endian.
//!
//! ```text
//! offset  size  field
//!      0     8  magic "CVAULT\r\n"
//!      8     2  format version (1)
//!     10     1  KDF id (1 = Argon2id v0x13)
//!     11     1  cipher id (1 = XChaCha20-Poly1305)
//!     12     4  KDF memory cost (KiB)
//!     16     4  KDF time cost
//!     20     4  KDF parallelism
//!     24    32  salt
//!     56    24  nonce
//!     80     4  ciphertext length n
//!     84     n  ciphertext
//!   84+n    16  authentication tag
//! ```
//!
//! Bytes `0..84` are the associated data of the cipher, so no header field
//! can be changed without failing authentication. Structural problems are
//! reported as `MalformedContainer` before any key is derived.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use zeroize::Zeroizing;

use crate::entry::VaultEntry;
use credvault_common::{EntryId, Error, Result};
use credvault_crypto::{aead, KdfParams, Salt, Tag, VaultKey, NONCE_SIZE, SALT_LENGTH, TAG_SIZE};

/// File magic.
pub const MAGIC: &[u8; 8] = b"CVAULT\r\n";

/// Current container format version.
pub const FORMAT_VERSION: u16 = 1;

/// KDF identifier for Argon2id v0x13.
pub const KDF_ARGON2ID: u8 = 1;

/// Cipher identifier for XChaCha20-Poly1305.
pub const CIPHER_XCHACHA20_POLY1305: u8 = 1;

/// Size of the fixed header, which is also the associated data.
pub const HEADER_SIZE: usize = 84;

/// Decrypted container content.
#[derive(Debug, Default, PartialEq, Eq, Deserialize)]
pub struct VaultPayload {
    /// Live entries in insertion order.
    pub entries: Vec<VaultEntry>,
    /// Identifiers of deleted entries. Never reissued.
    #[serde(default)]
    pub retired: BTreeSet<EntryId>,
}

impl VaultPayload {
    /// Borrowed view for sealing.
    pub fn view(&self) -> PayloadRef<'_> {
        PayloadRef {
            entries: &self.entries,
            retired: &self.retired,
        }
    }

    fn check(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for entry in &self.entries {
            if !seen.insert(entry.id) {
                return Err(Error::MalformedContainer(format!(
                    "duplicate entry id {}",
                    entry.id
                )));
            }
            if self.retired.contains(&entry.id) {
                return Err(Error::MalformedContainer(format!(
                    "entry id {} is both live and retired",
                    entry.id
                )));
            }
            entry.validate().map_err(|e| {
                Error::MalformedContainer(format!("entry {}: {}", entry.id, e))
            })?;
        }
        Ok(())
    }
}

/// Borrowed payload, serialized without cloning the entries.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PayloadRef<'a> {
    pub entries: &'a [VaultEntry],
    pub retired: &'a BTreeSet<EntryId>,
}

/// Parsed, still-encrypted container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultContainer {
    pub kdf: KdfParams,
    pub salt: Salt,
    pub nonce: [u8; NONCE_SIZE],
    pub ciphertext: Vec<u8>,
    pub tag: Tag,
}

/// Header summary readable without the passphrase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerInfo {
    pub version: u16,
    pub kdf: KdfParams,
    pub ciphertext_len: usize,
    pub total_len: usize,
}

impl VaultContainer {
    /// Serialize and encrypt `payload` under `key` with a fresh nonce.
    ///
    /// # Errors
    /// - `Serialization` if the payload cannot be encoded or is too large
    /// - `Crypto` if encryption fails
    pub fn seal(
        key: &VaultKey,
        salt: &Salt,
        kdf: KdfParams,
        payload: PayloadRef<'_>,
    ) -> Result<Self> {
        let plaintext = Zeroizing::new(
            serde_json::to_vec(&payload)
                .map_err(|e| Error::Serialization(format!("Failed to encode payload: {}", e)))?,
        );

        let nonce = aead::generate_nonce();
        let header = encode_header(&kdf, salt, &nonce, plaintext.len())?;
        let (ciphertext, tag) = aead::seal(key, &nonce, &plaintext, &header)?;

        Ok(Self {
            kdf,
            salt: salt.clone(),
            nonce,
            ciphertext,
            tag,
        })
    }

    /// Authenticate and decrypt the payload.
    ///
    /// # Errors
    /// - `AuthenticationFailure` for a wrong key or any modified byte
    /// - `MalformedContainer` if the authenticated plaintext does not parse
    pub fn open(&self, key: &VaultKey) -> Result<VaultPayload> {
        let header = self.header_bytes()?;
        let plaintext = aead::open(key, &self.nonce, &self.ciphertext, &self.tag, &header)?;

        let payload: VaultPayload = serde_json::from_slice(&plaintext)
            .map_err(|e| Error::MalformedContainer(format!("payload does not parse: {}", e)))?;
        payload.check()?;
        Ok(payload)
    }

    /// The 84 header bytes used as associated data.
    pub fn header_bytes(&self) -> Result<[u8; HEADER_SIZE]> {
        encode_header(&self.kdf, &self.salt, &self.nonce, self.ciphertext.len())
    }

    /// Encode to the on-disk byte layout.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let header = self.header_bytes()?;
        let mut out = Vec::with_capacity(HEADER_SIZE + self.ciphertext.len() + TAG_SIZE);
        out.extend_from_slice(&header);
        out.extend_from_slice(&self.ciphertext);
        out.extend_from_slice(&self.tag);
        Ok(out)
    }

    /// Parse the on-disk byte layout.
    ///
    /// Every length is checked before it is used and trailing bytes are
    /// rejected.
    ///
    /// # Errors
    /// - `MalformedContainer` for any structural problem
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut reader = Reader::new(bytes);
        let kdf = read_header_prefix(&mut reader)?;

        let mut salt = [0u8; SALT_LENGTH];
        salt.copy_from_slice(reader.take(SALT_LENGTH, "salt")?);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(reader.take(NONCE_SIZE, "nonce")?);

        let ct_len = reader.u32("ciphertext length")? as usize;
        let expected = ct_len
            .checked_add(TAG_SIZE)
            .ok_or_else(|| malformed("ciphertext length overflows"))?;
        if reader.remaining() != expected {
            return Err(malformed(format!(
                "length mismatch: header declares {} ciphertext bytes, {} bytes follow the header",
                ct_len,
                reader.remaining()
            )));
        }

        let ciphertext = reader.take(ct_len, "ciphertext")?.to_vec();
        let mut tag = [0u8; TAG_SIZE];
        tag.copy_from_slice(reader.take(TAG_SIZE, "tag")?);

        Ok(Self {
            kdf,
            salt: Salt::from_bytes(salt),
            nonce,
            ciphertext,
            tag,
        })
    }
}

/// Read the header summary of `bytes` without decrypting.
///
/// # Errors
/// - `MalformedContainer` if the bytes are not a well-formed container
pub fn inspect(bytes: &[u8]) -> Result<ContainerInfo> {
    let container = VaultContainer::decode(bytes)?;
    Ok(ContainerInfo {
        version: FORMAT_VERSION,
        kdf: container.kdf,
        ciphertext_len: container.ciphertext.len(),
        total_len: bytes.len(),
    })
}

fn encode_header(
    kdf: &KdfParams,
    salt: &Salt,
    nonce: &[u8; NONCE_SIZE],
    ct_len: usize,
) -> Result<[u8; HEADER_SIZE]> {
    let ct_len = u32::try_from(ct_len).map_err(|_| {
        Error::Serialization(format!("Payload too large for container: {} bytes", ct_len))
    })?;

    let mut header = [0u8; HEADER_SIZE];
    header[0..8].copy_from_slice(MAGIC);
    header[8..10].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
    header[10] = KDF_ARGON2ID;
    header[11] = CIPHER_XCHACHA20_POLY1305;
    header[12..16].copy_from_slice(&kdf.memory_cost.to_le_bytes());
    header[16..20].copy_from_slice(&kdf.time_cost.to_le_bytes());
    header[20..24].copy_from_slice(&kdf.parallelism.to_le_bytes());
    header[24..56].copy_from_slice(salt.as_bytes());
    header[56..80].copy_from_slice(nonce);
    header[80..84].copy_from_slice(&ct_len.to_le_bytes());
    Ok(header)
}

fn read_header_prefix(reader: &mut Reader<'_>) -> Result<KdfParams> {
    if reader.take(MAGIC.len(), "magic")? != MAGIC {
        return Err(malformed("not a vault container (bad magic)"));
    }

    let version = reader.u16("version")?;
    if version != FORMAT_VERSION {
        return Err(malformed(format!("unsupported format version {}", version)));
    }

    let kdf_id = reader.u8("KDF id")?;
    if kdf_id != KDF_ARGON2ID {
        return Err(malformed(format!("unknown KDF id {}", kdf_id)));
    }
    let cipher_id = reader.u8("cipher id")?;
    if cipher_id != CIPHER_XCHACHA20_POLY1305 {
        return Err(malformed(format!("unknown cipher id {}", cipher_id)));
    }

    let kdf = KdfParams {
        memory_cost: reader.u32("KDF memory cost")?,
        time_cost: reader.u32("KDF time cost")?,
        parallelism: reader.u32("KDF parallelism")?,
    };
    kdf.validate()
        .map_err(|e| malformed(format!("KDF parameters out of bounds: {}", e)))?;
    Ok(kdf)
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::MalformedContainer(msg.into())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(malformed(format!("truncated at {}", field)));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn u8(&mut self, field: &str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    fn u16(&mut self, field: &str) -> Result<u16> {
        let mut buf = [0u8; 2];
        buf.copy_from_slice(self.take(2, field)?);
        Ok(u16::from_le_bytes(buf))
    }

    fn u32(&mut self, field: &str) -> Result<u32> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.take(4, field)?);
        Ok(u32::from_le_bytes(buf))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use credvault_common::SecretString;
    use proptest::prelude::*;
    use uuid::Uuid;

    fn test_key() -> VaultKey {
        VaultKey::from_bytes([7u8; 32])
    }

    fn test_kdf() -> KdfParams {
        KdfParams::new(64, 1, 1).unwrap()
    }

    fn entry(n: u128, title: &str, secret: &str) -> VaultEntry {
        let at = Utc.timestamp_opt(1_700_000_000 + n as i64, 0).unwrap();
        VaultEntry {
            id: EntryId::from_uuid(Uuid::from_u128(n)),
            title: title.to_string(),
            username: "alice".to_string(),
            secret: SecretString::from(secret),
            notes: None,
            created_at: at,
            modified_at: at,
        }
    }

    fn sealed(payload: &VaultPayload) -> VaultContainer {
        VaultContainer::seal(&test_key(), &Salt::from_bytes([3u8; 32]), test_kdf(), payload.view())
            .unwrap()
    }

    fn sample_payload() -> VaultPayload {
        VaultPayload {
            entries: vec![entry(1, "Email", "p@ss1"), entry(2, "Bank", "hunter2")],
            retired: [EntryId::from_uuid(Uuid::from_u128(99))].into_iter().collect(),
        }
    }

    #[test]
    fn test_layout_offsets() {
        let container = sealed(&sample_payload());
        let bytes = container.encode().unwrap();

        assert_eq!(&bytes[0..8], MAGIC);
        assert_eq!(u16::from_le_bytes([bytes[8], bytes[9]]), FORMAT_VERSION);
        assert_eq!(bytes[10], KDF_ARGON2ID);
        assert_eq!(bytes[11], CIPHER_XCHACHA20_POLY1305);
        assert_eq!(&bytes[12..16], &64u32.to_le_bytes());
        assert_eq!(&bytes[16..20], &1u32.to_le_bytes());
        assert_eq!(&bytes[20..24], &1u32.to_le_bytes());
        assert_eq!(&bytes[24..56], &[3u8; 32]);
        assert_eq!(&bytes[56..80], &container.nonce);

        let ct_len = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
        assert_eq!(ct_len, container.ciphertext.len());
        assert_eq!(bytes.len(), HEADER_SIZE + ct_len + TAG_SIZE);
        assert_eq!(&bytes[HEADER_SIZE + ct_len..], &container.tag);
    }

    #[test]
    fn test_seal_open() {
        let payload = sample_payload();
        let container = sealed(&payload);
        let decoded = VaultContainer::decode(&container.encode().unwrap()).unwrap();
        assert_eq!(decoded, container);
        assert_eq!(decoded.open(&test_key()).unwrap(), payload);
    }

    #[test]
    fn test_plaintext_not_visible() {
        let bytes = sealed(&sample_payload()).encode().unwrap();
        let haystack = String::from_utf8_lossy(&bytes);
        assert!(!haystack.contains("hunter2"));
        assert!(!haystack.contains("Email"));
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let payload = sample_payload();
        assert_ne!(sealed(&payload).nonce, sealed(&payload).nonce);
    }

    #[test]
    fn test_wrong_key_is_authentication_failure() {
        let container = sealed(&sample_payload());
        let wrong = VaultKey::from_bytes([8u8; 32]);
        assert!(matches!(
            container.open(&wrong),
            Err(Error::AuthenticationFailure)
        ));
    }

    #[test]
    fn test_empty_vault() {
        let payload = VaultPayload::default();
        let container = sealed(&payload);
        let opened = VaultContainer::decode(&container.encode().unwrap())
            .unwrap()
            .open(&test_key())
            .unwrap();
        assert!(opened.entries.is_empty());
        assert!(opened.retired.is_empty());
    }

    #[test]
    fn test_structural_errors() {
        fn is_malformed(b: &[u8]) -> bool {
            matches!(VaultContainer::decode(b), Err(Error::MalformedContainer(_)))
        }
        let bytes = sealed(&sample_payload()).encode().unwrap();

        assert!(is_malformed(&[]));
        assert!(is_malformed(&bytes[..HEADER_SIZE - 1]));
        assert!(is_malformed(&bytes[..bytes.len() - 1]));

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(is_malformed(&trailing));

        let mut magic = bytes.clone();
        magic[0] = b'X';
        assert!(is_malformed(&magic));

        let mut version = bytes.clone();
        version[8] = 2;
        assert!(is_malformed(&version));

        let mut kdf_id = bytes.clone();
        kdf_id[10] = 2;
        assert!(is_malformed(&kdf_id));

        let mut cipher_id = bytes.clone();
        cipher_id[11] = 9;
        assert!(is_malformed(&cipher_id));

        let mut huge_memory = bytes.clone();
        huge_memory[12..16].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(is_malformed(&huge_memory));

        let mut zero_time = bytes.clone();
        zero_time[16..20].copy_from_slice(&0u32.to_le_bytes());
        assert!(is_malformed(&zero_time));

        let mut huge_len = bytes.clone();
        huge_len[80..84].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(is_malformed(&huge_len));
    }

    #[test]
    fn test_header_tamper_fails_authentication() {
        let container = sealed(&sample_payload());

        let mut salt = container.clone();
        salt.salt.0[0] ^= 1;
        assert!(matches!(salt.open(&test_key()), Err(Error::AuthenticationFailure)));

        let mut nonce = container.clone();
        nonce.nonce[23] ^= 0x80;
        assert!(matches!(nonce.open(&test_key()), Err(Error::AuthenticationFailure)));

        // A still-valid KDF change is bound through the header.
        let mut kdf = container.clone();
        kdf.kdf.memory_cost = 65;
        assert!(matches!(kdf.open(&test_key()), Err(Error::AuthenticationFailure)));

        let mut tag = container;
        tag.tag[0] ^= 1;
        assert!(matches!(tag.open(&test_key()), Err(Error::AuthenticationFailure)));
    }

    #[test]
    fn test_authenticated_garbage_is_malformed() {
        // Encrypt bytes that are not a payload with the right key.
        let nonce = aead::generate_nonce();
        let salt = Salt::from_bytes([1u8; 32]);
        let plaintext = b"not json";
        let header = encode_header(&test_kdf(), &salt, &nonce, plaintext.len()).unwrap();
        let (ciphertext, tag) = aead::seal(&test_key(), &nonce, plaintext, &header).unwrap();
        let container = VaultContainer {
            kdf: test_kdf(),
            salt,
            nonce,
            ciphertext,
            tag,
        };
        assert!(matches!(
            container.open(&test_key()),
            Err(Error::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let payload = VaultPayload {
            entries: vec![entry(1, "A", "x"), entry(1, "B", "y")],
            retired: BTreeSet::new(),
        };
        assert!(matches!(
            sealed(&payload).open(&test_key()),
            Err(Error::MalformedContainer(_))
        ));
    }

    #[test]
    fn test_invalid_entries_rejected() {
        let mut backwards = entry(2, "B", "y");
        backwards.modified_at = backwards.created_at - chrono::Duration::seconds(1);
        for bad in [entry(1, " ", "x"), backwards] {
            let payload = VaultPayload {
                entries: vec![bad],
                retired: BTreeSet::new(),
            };
            assert!(matches!(
                sealed(&payload).open(&test_key()),
                Err(Error::MalformedContainer(_))
            ));
        }
    }

    #[test]
    fn test_inspect() {
        let bytes = sealed(&sample_payload()).encode().unwrap();
        let info = inspect(&bytes).unwrap();
        assert_eq!(info.version, FORMAT_VERSION);
        assert_eq!(info.kdf, test_kdf());
        assert_eq!(info.total_len, bytes.len());
        assert_eq!(info.ciphertext_len, bytes.len() - HEADER_SIZE - TAG_SIZE);
    }

    fn arb_entry(n: u128) -> impl Strategy<Value = VaultEntry> {
        (
            "[^\\s].{0,24}",
            ".{0,24}",
            ".{0,40}",
            proptest::option::of(".{0,60}"),
            0i64..4_000_000_000,
            0u32..1_000_000_000,
            0i64..1_000_000,
        )
            .prop_map(move |(title, username, secret, notes, secs, nanos, delta)| {
                let created_at = Utc.timestamp_opt(secs, nanos).unwrap();
                VaultEntry {
                    id: EntryId::from_uuid(Uuid::from_u128(n)),
                    title,
                    username,
                    secret: SecretString::from(secret),
                    notes,
                    created_at,
                    modified_at: created_at + chrono::Duration::seconds(delta),
                }
            })
    }

    fn arb_payload() -> impl Strategy<Value = VaultPayload> {
        (0usize..6).prop_flat_map(|count| {
            let entries: Vec<_> = (0..count).map(|i| arb_entry(i as u128 + 1)).collect();
            (entries, proptest::collection::btree_set(1000u128..2000, 0..4)).prop_map(
                |(entries, retired)| VaultPayload {
                    entries,
                    retired: retired
                        .into_iter()
                        .map(|n| EntryId::from_uuid(Uuid::from_u128(n)))
                        .collect(),
                },
            )
        })
    }

    proptest! {
        #[test]
        fn prop_encode_decode_open_roundtrip(payload in arb_payload()) {
            let container = sealed(&payload);
            let bytes = container.encode().unwrap();
            let opened = VaultContainer::decode(&bytes).unwrap().open(&test_key()).unwrap();
            prop_assert_eq!(opened, payload);
        }

        #[test]
        fn prop_decode_never_panics(bytes in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = VaultContainer::decode(&bytes);
        }

        #[test]
        fn prop_truncation_is_malformed(cut in 0usize..HEADER_SIZE + TAG_SIZE) {
            let bytes = sealed(&sample_payload()).encode().unwrap();
            let truncated = &bytes[..bytes.len() - 1 - cut.min(bytes.len() - 1)];
            prop_assert!(matches!(
                VaultContainer::decode(truncated),
                Err(Error::MalformedContainer(_))
            ));
        }
    }
}
