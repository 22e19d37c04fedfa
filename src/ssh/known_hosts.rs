//! Host key verification against an OpenSSH known_hosts file.
//!
//! Trust-on-first-use: a matching entry is accepted, an unknown host is
//! accepted and appended, a different key or a revoked key is rejected.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use hmac::{Hmac, Mac};
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use sha1::Sha1;
use ssh_key::known_hosts::{HostPatterns, KnownHosts, Marker};

use crate::models::error::OssecError;

#[derive(Debug, PartialEq, Eq)]
pub enum HostKeyStatus {
    Matched,
    Unknown { key_type: String, fingerprint: String },
    Mismatch { expected: String, actual: String },
    Revoked,
}

/// Host label as written in known_hosts: bare for port 22, `[host]:port` otherwise
pub fn host_label(hostname: &str, port: u16) -> String {
    if port == 22 {
        hostname.to_string()
    } else {
        format!("[{}]:{}", hostname, port)
    }
}

pub struct KnownHostsFile {
    path: PathBuf,
}

impl KnownHostsFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// ~/.ssh/known_hosts
    pub fn user_default() -> Result<Self, OssecError> {
        dirs::home_dir()
            .map(|home| Self::new(home.join(".ssh").join("known_hosts")))
            .ok_or_else(|| OssecError::InvalidConfiguration("Could not determine home directory".to_string()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn check(&self, hostname: &str, port: u16, key: &PublicKey) -> Result<HostKeyStatus, OssecError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(check_content(&content, hostname, port, key)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(unknown(key)),
            Err(e) => Err(OssecError::HostKeyVerificationFailed {
                hostname: hostname.to_string(),
                reason: format!("Failed to read {}: {}", self.path.display(), e),
            }),
        }
    }

    /// Append an entry for this host, creating the file (and its directory) if needed
    pub fn record(&self, hostname: &str, port: u16, key: &PublicKey) -> Result<(), OssecError> {
        let fail = |what: &str, e: std::io::Error| OssecError::HostKeyVerificationFailed {
            hostname: hostname.to_string(),
            reason: format!("{} {}: {}", what, self.path.display(), e),
        };

        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).map_err(|e| fail("Failed to create directory for", e))?;
        }

        let line = format!(
            "{} {} {}\n",
            host_label(hostname, port),
            key.name(),
            key.public_key_base64()
        );

        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| file.write_all(line.as_bytes()))
            .map_err(|e| fail("Failed to append to", e))?;

        tracing::info!("Recorded {} host key for {}", key.name(), host_label(hostname, port));
        Ok(())
    }
}

fn unknown(key: &PublicKey) -> HostKeyStatus {
    HostKeyStatus::Unknown {
        key_type: key.name().to_string(),
        fingerprint: key.fingerprint(),
    }
}

fn check_content(content: &str, hostname: &str, port: u16, key: &PublicKey) -> HostKeyStatus {
    let label = host_label(hostname, port);
    let offered = ssh_key::PublicKey::from_bytes(&key.public_key_bytes()).ok();
    let same_key = |stored: &ssh_key::PublicKey| {
        offered
            .as_ref()
            .map(|o| o.key_data() == stored.key_data())
            .unwrap_or(false)
    };

    let mut expected = None;
    for entry in KnownHosts::new(content).flatten() {
        if !patterns_match(entry.host_patterns(), hostname, &label) {
            continue;
        }
        let is_same = same_key(entry.public_key());
        if entry.marker() == Some(&Marker::Revoked) {
            if is_same {
                return HostKeyStatus::Revoked;
            }
        } else if is_same {
            return HostKeyStatus::Matched;
        } else if expected.is_none() {
            expected = Some(entry.public_key().fingerprint(Default::default()).to_string());
        }
    }

    match expected {
        Some(expected) => HostKeyStatus::Mismatch {
            expected,
            actual: key.fingerprint(),
        },
        None => unknown(key),
    }
}

fn patterns_match(patterns: &HostPatterns, hostname: &str, label: &str) -> bool {
    match patterns {
        HostPatterns::Patterns(list) => {
            let mut hit = false;
            for pattern in list {
                match pattern.strip_prefix('!') {
                    Some(negated) if wildcard(negated, label) || wildcard(negated, hostname) => return false,
                    Some(_) => {}
                    None => hit |= wildcard(pattern, label) || wildcard(pattern, hostname),
                }
            }
            hit
        }
        HostPatterns::HashedName { salt, hash } => {
            hashed_name_matches(salt, hash, label) || hashed_name_matches(salt, hash, hostname)
        }
    }
}

/// `|1|salt|hash` entries store HMAC-SHA1(salt, hostname)
fn hashed_name_matches(salt: &[u8], hash: &[u8; 20], name: &str) -> bool {
    let Ok(mut mac) = Hmac::<Sha1>::new_from_slice(salt) else {
        return false;
    };
    mac.update(name.as_bytes());
    mac.verify_slice(hash).is_ok()
}

/// `*` and `?` wildcards, as in ssh_config host patterns
fn wildcard(pattern: &str, text: &str) -> bool {
    let (p, t): (Vec<char>, Vec<char>) = (pattern.chars().collect(), text.chars().collect());
    let (mut pi, mut ti) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            backtrack = Some((pi, ti));
            pi += 1;
        } else if let Some((star, matched)) = backtrack {
            pi = star + 1;
            ti = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }
    p[pi..].iter().all(|c| *c == '*')
}
