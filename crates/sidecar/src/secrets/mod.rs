//! Preconfigured secrets written to disk at startup.
//!
//! Secrets are declared in pairs of environment variables sharing a name:
//!
//! ```text
//! VAULT_SECRET_PATH_DB=secret/data/db
//! VAULT_SECRET_FILE_DB=db.json            relative paths land in /tmp/vault
//! ```
//!
//! The nameless pair `VAULT_SECRET_PATH` / `VAULT_SECRET_FILE` is also
//! accepted, with the file defaulting to `/tmp/vault/secret.json`. Each secret
//! is read from Vault once and written as pretty JSON.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use crate::vault::{VaultClient, VaultError};

pub const DEFAULT_SECRET_DIRECTORY: &str = "/tmp/vault";
pub const DEFAULT_SECRET_FILE: &str = "secret.json";

const PATH_KEY: &str = "VAULT_SECRET_PATH";
const FILE_KEY: &str = "VAULT_SECRET_FILE";
const PATH_PREFIX: &str = "VAULT_SECRET_PATH_";
const FILE_PREFIX: &str = "VAULT_SECRET_FILE_";

/// One problem with the secret declarations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecretConfigError {
    #[error(
        "{prefix} is not valid configuration; \
         specify {bare} for a nameless secret or use a non-empty name"
    )]
    EmptyName {
        prefix: &'static str,
        bare: &'static str,
    },

    #[error("secret {name} must have both a path and a file (path={path:?}, file={file:?})")]
    Incomplete {
        name: String,
        path: String,
        file: String,
    },

    #[error("secrets {first} and {second} are both configured to write to {}", file.display())]
    FileClash {
        first: String,
        second: String,
        file: PathBuf,
    },
}

/// Every problem found while parsing the declarations.
#[derive(Debug, PartialEq, Eq)]
pub struct SecretConfigErrors(pub Vec<SecretConfigError>);

impl fmt::Display for SecretConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} invalid secret declaration(s)", self.0.len())?;
        for err in &self.0 {
            write!(f, "; {err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for SecretConfigErrors {}

/// Failure while fetching or writing a declared secret.
#[derive(Debug, Error)]
pub enum SecretWriteError {
    #[error("error reading secret {name}: {source}")]
    Read {
        name: String,
        #[source]
        source: VaultError,
    },

    #[error("failed to encode secret {name}: {source}")]
    Encode {
        name: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to create directory {} for secret {name}: {source}", dir.display())]
    CreateDir {
        name: String,
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write secret {name} to {}: {source}", file.display())]
    Write {
        name: String,
        file: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A secret to copy from Vault to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfiguredSecret {
    /// Empty for the nameless pair.
    pub name: String,
    pub vault_path: String,
    pub file_path: PathBuf,
}

impl ConfiguredSecret {
    /// Name for messages; the nameless secret shows as `<anonymous>`.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            "<anonymous>"
        } else {
            &self.name
        }
    }
}

#[derive(Default)]
struct Partial {
    path: Option<String>,
    file: Option<PathBuf>,
}

/// Collect secret declarations from `vars`, usually [`std::env::vars`].
///
/// The result is ordered by name. All problems are reported together.
///
/// # Errors
///
/// Returns [`SecretConfigErrors`] listing every empty name, incomplete pair,
/// and pair of secrets sharing a destination file.
pub fn parse_configured_secrets<I>(vars: I) -> Result<Vec<ConfiguredSecret>, SecretConfigErrors>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut errors = Vec::new();
    let mut partials: BTreeMap<String, Partial> = BTreeMap::new();
    let mut bare_path = None;
    let mut bare_file = None;

    for (key, value) in vars {
        let value = value.trim().to_owned();
        if key == PATH_KEY {
            bare_path = Some(value);
        } else if key == FILE_KEY {
            bare_file = Some(value);
        } else if let Some(name) = key.strip_prefix(PATH_PREFIX) {
            if name.is_empty() {
                errors.push(SecretConfigError::EmptyName {
                    prefix: PATH_PREFIX,
                    bare: PATH_KEY,
                });
                continue;
            }
            partials.entry(name.to_owned()).or_default().path = Some(value);
        } else if let Some(name) = key.strip_prefix(FILE_PREFIX) {
            if name.is_empty() {
                errors.push(SecretConfigError::EmptyName {
                    prefix: FILE_PREFIX,
                    bare: FILE_KEY,
                });
                continue;
            }
            partials.entry(name.to_owned()).or_default().file = file_path_from_env(&value);
        }
    }

    // The nameless secret only exists when its path is set; its file is optional.
    if let Some(path) = bare_path.filter(|p| !p.is_empty()) {
        let file = bare_file
            .as_deref()
            .and_then(file_path_from_env)
            .unwrap_or_else(|| Path::new(DEFAULT_SECRET_DIRECTORY).join(DEFAULT_SECRET_FILE));
        partials.insert(
            String::new(),
            Partial {
                path: Some(path),
                file: Some(file),
            },
        );
    }

    let mut secrets = Vec::new();
    let mut destinations: HashMap<PathBuf, String> = HashMap::new();
    for (name, partial) in partials {
        let (vault_path, file_path) = match (partial.path, partial.file) {
            (Some(p), Some(f)) if !p.is_empty() => (p, f),
            (path, file) => {
                errors.push(SecretConfigError::Incomplete {
                    name: if name.is_empty() { "<anonymous>".into() } else { name },
                    path: path.unwrap_or_default(),
                    file: file.map(|f| f.display().to_string()).unwrap_or_default(),
                });
                continue;
            }
        };
        let secret = ConfiguredSecret {
            name,
            vault_path,
            file_path,
        };
        if let Some(first) = destinations.get(&secret.file_path) {
            errors.push(SecretConfigError::FileClash {
                first: first.clone(),
                second: secret.display_name().to_owned(),
                file: secret.file_path.clone(),
            });
            continue;
        }
        destinations.insert(secret.file_path.clone(), secret.display_name().to_owned());
        secrets.push(secret);
    }

    if errors.is_empty() {
        Ok(secrets)
    } else {
        Err(SecretConfigErrors(errors))
    }
}

/// Absolute paths are kept; relative ones are placed under the default
/// secret directory. Empty means unset.
fn file_path_from_env(value: &str) -> Option<PathBuf> {
    if value.is_empty() {
        return None;
    }
    let path = Path::new(value);
    if path.is_absolute() {
        Some(path.to_path_buf())
    } else {
        Some(Path::new(DEFAULT_SECRET_DIRECTORY).join(path))
    }
}

/// Read each secret from Vault and write it to its file as pretty JSON,
/// creating parent directories as needed. Stops at the first failure.
///
/// `index_state` pins the reads to the consistency state of the login that
/// issued `token`.
pub async fn write_configured(
    vault: &VaultClient,
    token: &str,
    index_state: Option<&str>,
    secrets: &[ConfiguredSecret],
) -> Result<(), SecretWriteError> {
    for secret in secrets {
        let name = secret.display_name().to_owned();
        let document = vault
            .read(&secret.vault_path, token, index_state)
            .await
            .map_err(|source| SecretWriteError::Read {
                name: name.clone(),
                source,
            })?;
        let content =
            serde_json::to_vec_pretty(&document).map_err(|source| SecretWriteError::Encode {
                name: name.clone(),
                source,
            })?;

        if let Some(dir) = secret.file_path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|source| SecretWriteError::CreateDir {
                    name: name.clone(),
                    dir: dir.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&secret.file_path, content)
            .await
            .map_err(|source| SecretWriteError::Write {
                name: name.clone(),
                file: secret.file_path.clone(),
                source,
            })?;

        info!(secret = %name, file = %secret.file_path.display(), "wrote preconfigured secret");
    }
    Ok(())
}
