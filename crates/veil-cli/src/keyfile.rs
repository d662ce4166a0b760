//! Private key files: a single line holding the hex-encoded 32-byte seed.

use anyhow::Context;
use std::fs;
use std::io::Write;
use std::path::Path;
use veil_relay::SecretKey;

/// Read a secret key from `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or does not hold 64 hex
/// characters.
pub fn load(path: &Path) -> anyhow::Result<SecretKey> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("reading private key {}", path.display()))?;
    let mut seed = [0u8; 32];
    hex::decode_to_slice(contents.trim(), &mut seed)
        .with_context(|| format!("{} is not a hex-encoded 32-byte key", path.display()))?;
    let secret = SecretKey::from_bytes(&seed);
    zeroize::Zeroize::zeroize(&mut seed);
    Ok(secret)
}

/// Write `secret` to `path`, readable by the owner only.
///
/// # Errors
///
/// Returns an error if the file exists and `overwrite` is false, or if it
/// cannot be written.
pub fn save(path: &Path, secret: &SecretKey, overwrite: bool) -> anyhow::Result<()> {
    if path.exists() && !overwrite {
        anyhow::bail!("{} already exists (use --force to replace it)", path.display());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options
        .open(path)
        .with_context(|| format!("creating {}", path.display()))?;
    let mut encoded = hex::encode(secret.to_bytes());
    writeln!(file, "{encoded}")?;
    zeroize::Zeroize::zeroize(&mut encoded);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys/private_key");
        let secret = SecretKey::generate();

        save(&path, &secret, false).unwrap();
        let loaded = load(&path).unwrap();
        assert_eq!(loaded.public_key(), secret.public_key());
    }

    #[test]
    fn test_save_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("private_key");
        save(&path, &SecretKey::generate(), false).unwrap();

        assert!(save(&path, &SecretKey::generate(), false).is_err());
        let replacement = SecretKey::generate();
        save(&path, &replacement, true).unwrap();
        assert_eq!(load(&path).unwrap().public_key(), replacement.public_key());
    }

    #[cfg(unix)]
    #[test]
    fn test_save_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("private_key");
        save(&path, &SecretKey::generate(), false).unwrap();
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("private_key");
        fs::write(&path, "not a key\n").unwrap();
        assert!(load(&path).is_err());
        assert!(load(&dir.path().join("missing")).is_err());
    }
}
