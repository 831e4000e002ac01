//! Encrypted container codec.
//!
//! A container is an ordinary ZIP file whose every member is encrypted with
//! WinZip AES-256 (AE-2: PBKDF2-derived key, per-member salt, HMAC-SHA1
//! authentication code).  The member table stays readable without the
//! secret; member contents do not.
//!
//! # Writing
//! [`ContainerWriter`] builds the archive in a uniquely named sibling temp
//! file.  [`ContainerWriter::commit`] finishes the ZIP, syncs it, reopens it
//! and checks that every member decrypts to the BLAKE3 digest recorded when
//! it was added, and only then renames it onto the final path.  A writer
//! dropped before a successful commit removes its temp file.
//!
//! # Reading
//! [`ContainerReader::read_member`] decrypts one member completely into
//! memory before returning it, so a wrong secret or a tampered member never
//! produces partial output on disk.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Component, Path, PathBuf};

use log::{debug, warn};
use uuid::Uuid;
use zip::result::ZipError;
use zip::write::FileOptions;
use zip::{AesMode, CompressionMethod, ZipArchive, ZipWriter};

use crate::error::{Result, VaultError};
use crate::secret::Secret;

// ── MemberInfo ───────────────────────────────────────────────────────────────

/// Member-table entry, readable without the secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub index:           usize,
    pub name:            String,
    pub size:            u64,
    pub compressed_size: u64,
    pub encrypted:       bool,
    pub is_dir:          bool,
}

// ── Writer ───────────────────────────────────────────────────────────────────

pub struct ContainerWriter {
    final_path: PathBuf,
    temp_path:  PathBuf,
    zip:        Option<ZipWriter<File>>,
    secret:     Secret,
    /// (member name, BLAKE3 of plaintext) in insertion order.
    digests:    Vec<(String, [u8; 32])>,
    committed:  bool,
}

impl ContainerWriter {
    /// Start a new container that will land at `final_path` on commit.
    ///
    /// # Errors
    /// `CreateFailed` when `final_path` already exists or the temp file
    /// cannot be created.
    pub fn create(final_path: &Path, secret: &Secret) -> Result<Self> {
        let create_err = |source| VaultError::Create { path: final_path.to_owned(), source };
        if final_path.exists() {
            return Err(create_err(std::io::Error::new(
                std::io::ErrorKind::AlreadyExists,
                "container already exists",
            )));
        }
        let file_name = final_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| create_err(std::io::ErrorKind::InvalidInput.into()))?;
        let temp_path = final_path.with_file_name(format!(
            ".{file_name}.{}.partial",
            Uuid::new_v4().simple()
        ));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&temp_path)
            .map_err(create_err)?;
        debug!("event=container_create module=container temp={}", temp_path.display());

        Ok(Self {
            final_path: final_path.to_owned(),
            temp_path,
            zip:        Some(ZipWriter::new(file)),
            secret:     secret.clone(),
            digests:    Vec::new(),
            committed:  false,
        })
    }

    /// Add one encrypted member.
    pub fn add_member(&mut self, name: &str, data: &[u8]) -> Result<()> {
        if safe_relative(name).is_none() {
            return Err(VaultError::Commit(format!("refusing unsafe member name {name:?}")));
        }
        if self.digests.iter().any(|(n, _)| n == name) {
            return Err(VaultError::Commit(format!("duplicate member {name:?}")));
        }
        let zip = self.zip.as_mut()
            .ok_or_else(|| VaultError::Commit("container already finished".into()))?;

        let options: FileOptions<'_, ()> = FileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .with_aes_encryption(AesMode::Aes256, self.secret.expose());
        zip.start_file(name, options)
            .map_err(|e| VaultError::Commit(format!("cannot start member {name:?}: {e}")))?;
        zip.write_all(data)
            .map_err(|e| VaultError::Commit(format!("cannot write member {name:?}: {e}")))?;

        self.digests.push((name.to_owned(), blake3::hash(data).into()));
        Ok(())
    }

    /// Add the file at `path` as member `name`.
    pub fn add_file(&mut self, name: &str, path: &Path) -> Result<()> {
        let data = fs::read(path)
            .map_err(|e| VaultError::Commit(format!("cannot read {}: {e}", path.display())))?;
        self.add_member(name, &data)
    }

    pub fn member_count(&self) -> usize {
        self.digests.len()
    }

    /// Finish, verify and move the container into place.
    pub fn commit(mut self) -> Result<PathBuf> {
        let zip = self.zip.take()
            .ok_or_else(|| VaultError::Commit("container already finished".into()))?;
        let file = zip.finish()
            .map_err(|e| VaultError::Commit(format!("cannot finish archive: {e}")))?;
        file.sync_all()
            .map_err(|e| VaultError::Commit(format!("cannot sync archive: {e}")))?;
        drop(file);

        self.verify()?;

        if self.final_path.exists() {
            return Err(VaultError::Commit("container appeared while writing".into()));
        }
        fs::rename(&self.temp_path, &self.final_path)
            .map_err(|e| VaultError::Commit(format!("cannot move archive into place: {e}")))?;
        self.committed = true;
        debug!(
            "event=container_commit module=container status=ok members={} path={}",
            self.digests.len(),
            self.final_path.display()
        );
        Ok(self.final_path.clone())
    }

    fn verify(&self) -> Result<()> {
        let mut reader = ContainerReader::open(&self.temp_path)
            .map_err(|e| VaultError::Commit(format!("cannot reopen archive: {e}")))?;
        if reader.len() != self.digests.len() {
            return Err(VaultError::Commit(format!(
                "archive holds {} members, expected {}",
                reader.len(),
                self.digests.len()
            )));
        }
        for (index, (name, digest)) in self.digests.iter().enumerate() {
            let (stored, data) = reader.read_member(index, &self.secret)
                .map_err(|e| VaultError::Commit(format!("verification failed: {e}")))?;
            let actual: [u8; 32] = blake3::hash(&data).into();
            if &stored != name || &actual != digest {
                return Err(VaultError::Commit(format!("member {name:?} does not match its source")));
            }
        }
        Ok(())
    }
}

impl Drop for ContainerWriter {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        drop(self.zip.take());
        if let Err(e) = fs::remove_file(&self.temp_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "event=container_debris module=container path={} err={e}",
                    self.temp_path.display()
                );
            }
        }
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct ContainerReader {
    path: PathBuf,
    zip:  ZipArchive<File>,
}

impl ContainerReader {
    /// # Errors
    /// `NotFound` when the file is missing; `DecryptFailed` when it is not a
    /// readable ZIP (a corrupted container).
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => VaultError::ContainerMissing(path.to_owned()),
            _ => corrupt(format!("cannot open container: {e}")),
        })?;
        let zip = ZipArchive::new(file)
            .map_err(|e| corrupt(format!("unreadable container: {e}")))?;
        Ok(Self { path: path.to_owned(), zip })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.zip.len()
    }

    pub fn is_empty(&self) -> bool {
        self.zip.len() == 0
    }

    pub fn member(&mut self, index: usize) -> Result<MemberInfo> {
        let f = self.zip.by_index_raw(index)
            .map_err(|e| corrupt(format!("bad member table entry {index}: {e}")))?;
        Ok(MemberInfo {
            index,
            name:            f.name().to_owned(),
            size:            f.size(),
            compressed_size: f.compressed_size(),
            encrypted:       f.encrypted(),
            is_dir:          f.is_dir(),
        })
    }

    /// The member table, in archive order.
    pub fn members(&mut self) -> Result<Vec<MemberInfo>> {
        (0..self.zip.len()).map(|i| self.member(i)).collect()
    }

    /// Decrypt member `index` completely and return `(name, plaintext)`.
    ///
    /// Unencrypted members are rejected: a container only ever holds
    /// encrypted members, so a plain one means it was tampered with.
    pub fn read_member(&mut self, index: usize, secret: &Secret) -> Result<(String, Vec<u8>)> {
        let info = self.member(index)?;
        let fail = |reason: String| VaultError::Decrypt { member: info.name.clone(), reason };
        if !info.encrypted {
            return Err(fail("member is not encrypted".into()));
        }
        let mut f = match self.zip.by_index_decrypt(index, secret.expose().as_bytes()) {
            Ok(f)                          => f,
            Err(ZipError::InvalidPassword) => return Err(fail("wrong secret".into())),
            Err(e)                         => return Err(fail(e.to_string())),
        };
        let mut data = Vec::with_capacity(info.size.min(64 * 1024 * 1024) as usize);
        // The authentication code is checked once the member is fully read.
        f.read_to_end(&mut data).map_err(|e| fail(e.to_string()))?;
        Ok((info.name, data))
    }

    /// Decrypt every member into `target`, recreating subdirectories.
    /// Returns the written file paths.
    pub fn extract_all(&mut self, target: &Path, secret: &Secret) -> Result<Vec<PathBuf>> {
        let extract_err = |path: &Path, source| VaultError::Extract { path: path.to_owned(), source };

        // Directories are created lazily so a secret rejected on the first
        // member leaves nothing behind.
        let mut written = Vec::with_capacity(self.zip.len());
        for index in 0..self.zip.len() {
            let info = self.member(index)?;
            let rel = safe_relative(info.name.trim_end_matches('/')).ok_or_else(|| {
                VaultError::Decrypt { member: info.name.clone(), reason: "unsafe member path".into() }
            })?;
            let dest = target.join(rel);
            if info.is_dir {
                fs::create_dir_all(&dest).map_err(|e| extract_err(&dest, e))?;
                continue;
            }
            let (_, data) = self.read_member(index, secret)?;
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent).map_err(|e| extract_err(parent, e))?;
            }
            fs::write(&dest, &data).map_err(|e| extract_err(&dest, e))?;
            written.push(dest);
        }
        fs::create_dir_all(target).map_err(|e| extract_err(target, e))?;
        Ok(written)
    }
}

fn corrupt(reason: String) -> VaultError {
    VaultError::Decrypt { member: String::new(), reason }
}

/// `name` as a relative path that stays below its extraction root.
pub fn safe_relative(name: &str) -> Option<PathBuf> {
    if name.is_empty() || name.contains('\\') {
        return None;
    }
    let path = Path::new(name);
    path.components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then(|| path.to_path_buf())
}
