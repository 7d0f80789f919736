use std::{
    collections::HashMap,
    fs,
    path::{Component, Path, PathBuf},
    time::{Duration, Instant},
};

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::{config::SecurityMode, domain::ChatId, errors::Error, Result};

// ============== API key ==============

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthFailure {
    /// No credential header was sent.
    Missing,
    /// A credential was sent but does not match.
    Invalid,
}

/// Shared-secret check for the HTTP API.
///
/// Both sides are hashed before comparison so the constant-time compare runs
/// over equal-length digests regardless of the presented key's length.
#[derive(Clone)]
pub struct ApiKeyGuard {
    digest: Option<[u8; 32]>,
}

impl std::fmt::Debug for ApiKeyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyGuard")
            .field("enabled", &self.digest.is_some())
            .finish()
    }
}

impl ApiKeyGuard {
    pub fn new(mode: SecurityMode, secret: Option<&str>) -> Result<Self> {
        match (mode, secret) {
            (SecurityMode::None, _) => Ok(Self { digest: None }),
            (SecurityMode::ApiKey, Some(s)) if !s.is_empty() => Ok(Self {
                digest: Some(sha256(s)),
            }),
            (SecurityMode::ApiKey, _) => Err(Error::Config(
                "api key security requires a secret".to_string(),
            )),
        }
    }

    pub fn disabled() -> Self {
        Self { digest: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.digest.is_some()
    }

    /// Checks the first present credential among `candidates`.
    pub fn check(&self, candidates: &[Option<&str>]) -> std::result::Result<(), AuthFailure> {
        let Some(expected) = &self.digest else {
            return Ok(());
        };
        let Some(presented) = candidates.iter().flatten().next() else {
            return Err(AuthFailure::Missing);
        };
        if bool::from(sha256(presented).ct_eq(expected)) {
            Ok(())
        } else {
            Err(AuthFailure::Invalid)
        }
    }
}

fn sha256(s: &str) -> [u8; 32] {
    Sha256::digest(s.as_bytes()).into()
}

// ============== Rate Limiter (Token Bucket) ==============

#[derive(Clone, Debug)]
struct Bucket {
    tokens: f64,
    last_update: Instant,
}

/// Per-chat token bucket.
#[derive(Clone, Debug)]
pub struct RateLimiter {
    enabled: bool,
    max_tokens: f64,
    refill_per_sec: f64,
    buckets: HashMap<ChatId, Bucket>,
}

impl RateLimiter {
    pub fn new(enabled: bool, max_tokens: u32, window: Duration) -> Self {
        let max_tokens_f = f64::from(max_tokens.max(1));
        let window_secs = window.as_secs_f64().max(1e-9);

        Self {
            enabled,
            max_tokens: max_tokens_f,
            refill_per_sec: max_tokens_f / window_secs,
            buckets: HashMap::new(),
        }
    }

    /// Takes one token for `chat_id`. On refusal returns the wait until the next token.
    pub fn check(&mut self, chat_id: ChatId) -> std::result::Result<(), Duration> {
        self.check_at(chat_id, Instant::now())
    }

    pub fn check_at(
        &mut self,
        chat_id: ChatId,
        now: Instant,
    ) -> std::result::Result<(), Duration> {
        if !self.enabled {
            return Ok(());
        }

        let bucket = self.buckets.entry(chat_id).or_insert_with(|| Bucket {
            tokens: self.max_tokens,
            last_update: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_update).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.max_tokens);
        bucket.last_update = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }

        let secs = (1.0 - bucket.tokens) / self.refill_per_sec;
        Err(Duration::from_secs_f64(secs.max(0.0)))
    }
}

// ============== Path containment ==============

/// True when `candidate` resolves (symlinks and `..` included) inside `dir`.
pub fn is_within_dir(candidate: &Path, dir: &Path) -> bool {
    let (Ok(resolved), Ok(root)) = (resolve(candidate), resolve(dir)) else {
        return false;
    };
    resolved != root && resolved.starts_with(&root)
}

fn resolve(p: &Path) -> Result<PathBuf> {
    if let Ok(canon) = fs::canonicalize(p) {
        return Ok(canon);
    }

    let absolute = if p.is_absolute() {
        p.to_path_buf()
    } else {
        std::env::current_dir().map_err(Error::Io)?.join(p)
    };
    Ok(normalize_path(&absolute))
}

/// Lexical normalization used when the path does not exist yet.
fn normalize_path(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for c in p.components() {
        match c {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
