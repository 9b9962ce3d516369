use std::io::Write;
use std::process::Command;

/// Abstraction over public key derivation for testability.
///
/// Production code uses [`SshKeygen`], tests use mockall-generated mocks.
pub trait KeyDeriver {
    /// Return the OpenSSH public key line for `private_key`.
    fn derive_public(&self, private_key: &str) -> Result<String, KeyError>;
}

/// Derives public keys with `ssh-keygen -y`.
pub struct SshKeygen;

impl KeyDeriver for SshKeygen {
    fn derive_public(&self, private_key: &str) -> Result<String, KeyError> {
        // ssh-keygen refuses keys that are readable by others; NamedTempFile
        // is created with mode 0600.
        let mut file = tempfile::NamedTempFile::new().map_err(|e| KeyError::TempFile { source: e })?;
        let mut contents = private_key.to_owned();
        if !contents.ends_with('\n') {
            contents.push('\n');
        }
        file.write_all(contents.as_bytes())
            .map_err(|e| KeyError::TempFile { source: e })?;

        let output = Command::new("ssh-keygen")
            .arg("-y")
            .arg("-f")
            .arg(file.path())
            .output()
            .map_err(|e| KeyError::NotFound { source: e })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(KeyError::Failed { stderr });
        }

        let public =
            String::from_utf8(output.stdout).map_err(|e| KeyError::InvalidUtf8 { source: e })?;
        Ok(public.trim().to_owned())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    #[error("ssh-keygen not found")]
    NotFound { source: std::io::Error },
    #[error("failed to stage private key for ssh-keygen")]
    TempFile { source: std::io::Error },
    #[error("ssh-keygen rejected the private key: {stderr}")]
    Failed { stderr: String },
    #[error("ssh-keygen produced non-UTF-8 output")]
    InvalidUtf8 { source: std::string::FromUtf8Error },
}

/// Whether `text` looks like OpenSSH or RFC 4716 public key material.
pub fn is_public_key(text: &str) -> bool {
    let text = text.trim_start();
    ["ssh-", "ecdsa-", "sk-ssh-", "sk-ecdsa-", "---- BEGIN SSH2 PUBLIC KEY"]
        .iter()
        .any(|prefix| text.starts_with(prefix))
}

/// Conventional `~/.ssh` file name for the private half of `public_key`.
pub fn private_key_file_name(public_key: &str) -> &'static str {
    match public_key.split_whitespace().next().unwrap_or_default() {
        "ssh-ed25519" => "id_ed25519",
        "ssh-rsa" => "id_rsa",
        t if t.starts_with("ecdsa-") => "id_ecdsa",
        t if t.starts_with("sk-ssh-ed25519") => "id_ed25519_sk",
        t if t.starts_with("sk-ecdsa-") => "id_ecdsa_sk",
        _ => "id_key",
    }
}
