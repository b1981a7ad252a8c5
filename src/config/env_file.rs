//! Key-value environment file loading.
//!
//! The file holds `KEY=VALUE` lines and `#` comments. Values are read
//! literally except for one pair of surrounding quotes, so a `$` in a secret
//! stays a `$`. Lines that do not parse (for example lines without `=`) are
//! skipped rather than rejected.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, Result};

/// Default environment file name, looked up in the working directory.
pub const DEFAULT_ENV_FILE: &str = ".env";

/// A variable that may be forwarded from the environment file to the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardedVariable {
    /// Variable name.
    pub name: &'static str,
    /// Whether the value is a secret.
    pub secret: bool,
}

/// The only environment-file keys that reach the running instance.
pub const FORWARDED_VARIABLES: &[ForwardedVariable] = &[
    ForwardedVariable {
        name: "AZURE_AD_TENANT_ID",
        secret: false,
    },
    ForwardedVariable {
        name: "AZURE_AD_CLIENT_ID",
        secret: false,
    },
    ForwardedVariable {
        name: "AZURE_AD_CLIENT_SECRET",
        secret: true,
    },
    ForwardedVariable {
        name: "OPENWEATHER_API_KEY",
        secret: true,
    },
];

/// Looks up a name in the forwarding allow-list.
#[must_use]
pub fn forwarded_variable(name: &str) -> Option<&'static ForwardedVariable> {
    FORWARDED_VARIABLES.iter().find(|v| v.name == name)
}

/// Parsed contents of an environment file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    /// Where the values came from, if anywhere.
    path: Option<PathBuf>,
    /// Key-value pairs; later lines win.
    values: BTreeMap<String, String>,
}

impl EnvFile {
    /// An empty file, used when no environment file is present.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            path: None,
            values: BTreeMap::new(),
        }
    }

    /// Builds an environment file from in-memory pairs.
    #[must_use]
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            path: None,
            values: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Loads an environment file that must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or unreadable.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        info!("Loading environment file: {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let mut values = BTreeMap::new();
        for (number, line) in content.lines().enumerate() {
            match parse_line(line) {
                Some((key, value)) => {
                    values.insert(key.to_string(), value.to_string());
                }
                None if !is_blank_or_comment(line) => {
                    debug!("Ignoring unparsable line {} in {}", number + 1, path.display());
                }
                None => {}
            }
        }

        debug!("Read {} entries from {}", values.len(), path.display());

        Ok(Self {
            path: Some(path.to_path_buf()),
            values,
        })
    }

    /// Loads `path` if given, otherwise `.env` when it exists.
    ///
    /// An explicitly named file must exist; the default one is optional.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file is missing or any file is unreadable.
    pub fn load_optional(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => {
                let default = Path::new(DEFAULT_ENV_FILE);
                if default.exists() {
                    Self::load(default)
                } else {
                    debug!("No {DEFAULT_ENV_FILE} file found, using defaults only");
                    Ok(Self::empty())
                }
            }
        }
    }

    /// Gets a non-empty value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Source path, if the values came from a file.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if the file had no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Entries on the forwarding allow-list, with their secret flag.
    pub fn forwarded(&self) -> impl Iterator<Item = (&'static ForwardedVariable, &str)> {
        FORWARDED_VARIABLES
            .iter()
            .filter_map(|var| self.get(var.name).map(|value| (var, value)))
    }
}

fn is_blank_or_comment(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with('#')
}

/// Splits one `KEY=VALUE` line. Values are taken literally apart from one
/// pair of matching surrounding quotes; `$` references are not expanded.
fn parse_line(line: &str) -> Option<(&str, &str)> {
    if is_blank_or_comment(line) {
        return None;
    }

    let line = line.trim();
    let line = line.strip_prefix("export ").unwrap_or(line);
    let (key, value) = line.split_once('=')?;
    let key = key.trim();

    let valid_key = key
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
    if !valid_key {
        return None;
    }

    Some((key, unquote(value.trim())))
}

fn unquote(value: &str) -> &str {
    ['"', '\'']
        .iter()
        .find_map(|&q| {
            value
                .strip_prefix(q)
                .and_then(|rest| rest.strip_suffix(q))
        })
        .unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_env(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().expect("Failed to create temp file");
        file.write_all(content.as_bytes())
            .expect("Failed to write temp file");
        file
    }

    #[test]
    fn test_load_skips_comments_and_malformed_lines() {
        let file = write_env(
            "# registry settings\nACR_NAME=reg1\nTHIS LINE HAS NO EQUALS\n\nIMAGE_TAG=v2\n",
        );

        let env = EnvFile::load(file.path()).expect("Failed to load env file");
        assert_eq!(env.get("ACR_NAME"), Some("reg1"));
        assert_eq!(env.get("IMAGE_TAG"), Some("v2"));
        assert_eq!(env.len(), 2);
    }

    #[test]
    fn test_load_strips_quotes() {
        let file = write_env("AZURE_AD_TENANT_ID=\"tenant-123\"\nOPENWEATHER_API_KEY='abc'\n");

        let env = EnvFile::load(file.path()).expect("Failed to load env file");
        assert_eq!(env.get("AZURE_AD_TENANT_ID"), Some("tenant-123"));
        assert_eq!(env.get("OPENWEATHER_API_KEY"), Some("abc"));
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let result = EnvFile::load_optional(Some(Path::new("/nonexistent/deploy.env")));
        assert!(matches!(
            result,
            Err(crate::error::DeployError::Config(ConfigError::FileNotFound { .. }))
        ));
    }

    #[test]
    fn test_forwarded_only_allow_listed() {
        let env = EnvFile::from_pairs([
            ("AZURE_AD_CLIENT_SECRET", "s3cret"),
            ("HOME", "/root"),
            ("ACR_NAME", "reg1"),
        ]);

        let forwarded: Vec<_> = env.forwarded().collect();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].0.name, "AZURE_AD_CLIENT_SECRET");
        assert!(forwarded[0].0.secret);
        assert_eq!(forwarded[0].1, "s3cret");
    }

    #[test]
    fn test_empty_values_are_absent() {
        let env = EnvFile::from_pairs([("ACR_NAME", "")]);
        assert_eq!(env.get("ACR_NAME"), None);
    }

    #[test]
    fn test_dollar_signs_are_kept_literally() {
        let file = write_env(
            "OPENWEATHER_API_KEY=ab$HOMEcd\nAZURE_AD_CLIENT_SECRET=\"x${HOME}~z\"\nAZURE_AD_TENANT_ID='$t'\n",
        );

        let env = EnvFile::load(file.path()).expect("Failed to load env file");
        assert_eq!(env.get("OPENWEATHER_API_KEY"), Some("ab$HOMEcd"));
        assert_eq!(env.get("AZURE_AD_CLIENT_SECRET"), Some("x${HOME}~z"));
        assert_eq!(env.get("AZURE_AD_TENANT_ID"), Some("$t"));
    }

    #[test]
    fn test_parse_line_edge_cases() {
        assert_eq!(parse_line("export ACR_NAME=reg1"), Some(("ACR_NAME", "reg1")));
        assert_eq!(parse_line("  # ACR_NAME=reg1"), None);
        assert_eq!(parse_line("BAD KEY=value"), None);
        assert_eq!(parse_line("KEY=a=b"), Some(("KEY", "a=b")));
        assert_eq!(parse_line("KEY=\"unbalanced"), Some(("KEY", "\"unbalanced")));
        assert_eq!(parse_line("KEY="), Some(("KEY", "")));
    }
}
