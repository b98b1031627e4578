use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{SigningKey, VerifyingKey};

/// Paths written by [`generate_keypair_files`].
#[derive(Debug, Clone)]
pub struct KeyFiles {
    pub secret: PathBuf,
    pub public: PathBuf,
    pub fingerprint: String,
    /// Base64 verifying key, the value `ALIPAY_PUBLIC_KEY` expects.
    pub public_b64: String,
}

/// Generate an Ed25519 keypair for signing test notifications.
///
/// Writes `<prefix>.secret` (base64 32-byte seed, mode 0600 on Unix) and
/// `<prefix>.pub` (base64 32-byte verifying key).
pub fn generate_keypair_files(algorithm: &str, output_prefix: &str) -> Result<KeyFiles, String> {
    if !algorithm.eq_ignore_ascii_case("ed25519") {
        return Err(format!(
            "unsupported algorithm '{algorithm}'; only 'ed25519' is supported"
        ));
    }

    let signing_key = SigningKey::generate(&mut rand::rngs::OsRng);
    let verifying_key = signing_key.verifying_key();
    let secret_b64 = BASE64.encode(signing_key.to_bytes());
    let public_b64 = BASE64.encode(verifying_key.to_bytes());

    let secret = PathBuf::from(format!("{output_prefix}.secret"));
    std::fs::write(&secret, &secret_b64)
        .map_err(|e| format!("error writing secret key to '{}': {e}", secret.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if let Err(e) = std::fs::set_permissions(&secret, std::fs::Permissions::from_mode(0o600)) {
            tracing::warn!(path = %secret.display(), error = %e, "could not restrict secret key permissions");
        }
    }

    let public = PathBuf::from(format!("{output_prefix}.pub"));
    std::fs::write(&public, &public_b64)
        .map_err(|e| format!("error writing public key to '{}': {e}", public.display()))?;

    Ok(KeyFiles {
        secret,
        public,
        fingerprint: key_fingerprint(&verifying_key),
        public_b64,
    })
}

/// `openaero keygen`
pub fn cmd_keygen(algorithm: &str, output_prefix: &str) {
    match generate_keypair_files(algorithm, output_prefix) {
        Ok(files) => {
            println!(
                "Generated Ed25519 keypair: {}, {}",
                files.secret.display(),
                files.public.display()
            );
            println!("fingerprint: {}", files.fingerprint);
            println!("ALIPAY_PUBLIC_KEY={}", files.public_b64);
        }
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(1);
        }
    }
}

/// Read a `.secret` file: a base64 32-byte Ed25519 seed.
pub fn read_secret_key(path: &Path) -> Result<SigningKey, String> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| format!("error reading secret key '{}': {e}", path.display()))?;
    let bytes = BASE64
        .decode(contents.trim())
        .map_err(|e| format!("error decoding secret key '{}': {e}", path.display()))?;
    let key_bytes: [u8; 32] = bytes.try_into().map_err(|_| {
        format!(
            "invalid secret key length in '{}': expected 32 bytes",
            path.display()
        )
    })?;
    Ok(SigningKey::from_bytes(&key_bytes))
}

/// First 8 bytes of the key, hex.
pub fn key_fingerprint(key: &VerifyingKey) -> String {
    hex_prefix(&key.to_bytes()[..8])
}

fn hex_prefix(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
