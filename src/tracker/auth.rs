//! Credentials and request identity.
//!
//! Two bearer formats are accepted:
//! - session tokens `v1.<claims>.<sig>` issued by `POST /api/auth/login`,
//!   HMAC-SHA256 signed with the configured secret;
//! - API tokens `kvy_<32 hex>`, stored only as a SHA-256 digest.
//!
//! Either resolves to a [`Principal`]: the user plus the permissions the
//! request may exercise.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use hmac::{Hmac, Mac};
use kartavya_common::models::{Permission, Role, User};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::errors::{TrackerError, TrackerResult};
use crate::tracker::db::{NewApiToken, TrackerDb};

type HmacSha256 = Hmac<Sha256>;

const HASH_SCHEME: &str = "sha256";
const HASH_ROUNDS: usize = 10_000;
const SESSION_VERSION: &str = "v1";
pub const API_TOKEN_PREFIX: &str = "kvy_";
const API_TOKEN_DISPLAY_LEN: usize = 8;
pub const MIN_PASSWORD_LEN: usize = 8;
/// Longest lifetime an API token may be created with.
pub const MAX_API_TOKEN_DAYS: u32 = 3650;

const BAD_CREDENTIALS: &str = "Invalid email or password";

// ── Passwords ─────────────────────────────────────────────────────────

fn stretch(salt: &[u8], password: &[u8]) -> [u8; 32] {
    let mut digest: [u8; 32] = Sha256::new()
        .chain_update(salt)
        .chain_update(password)
        .finalize()
        .into();
    for _ in 1..HASH_ROUNDS {
        digest = Sha256::new()
            .chain_update(salt)
            .chain_update(digest)
            .finalize()
            .into();
    }
    digest
}

pub fn validate_password(password: &str) -> TrackerResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(TrackerError::validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Hash a password as `sha256$<salt hex>$<digest hex>`.
pub fn hash_password(password: &str) -> String {
    let salt = Uuid::new_v4().into_bytes();
    let digest = stretch(&salt, password.as_bytes());
    format!("{}${}${}", HASH_SCHEME, hex::encode(salt), hex::encode(digest))
}

/// Constant-time check of `password` against a stored hash. Malformed
/// hashes never verify.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.split('$');
    let (Some(scheme), Some(salt), Some(digest), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    if scheme != HASH_SCHEME {
        return false;
    }
    let (Ok(salt), Ok(expected)) = (hex::decode(salt), hex::decode(digest)) else {
        return false;
    };
    let computed = stretch(&salt, password.as_bytes());

    // Compare MACs of the two digests so the comparison runs in constant time.
    let Ok(mut mac) = HmacSha256::new_from_slice(&salt) else {
        return false;
    };
    mac.update(&expected);
    let expected_tag = mac.finalize().into_bytes();
    let Ok(mut mac) = HmacSha256::new_from_slice(&salt) else {
        return false;
    };
    mac.update(&computed);
    mac.verify_slice(&expected_tag).is_ok()
}

// ── Session tokens ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: i64,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies signed session tokens.
#[derive(Clone)]
pub struct TokenSigner {
    secret: Vec<u8>,
    ttl_secs: u64,
}

impl TokenSigner {
    pub fn new(secret: impl Into<Vec<u8>>, ttl_secs: u64) -> Self {
        Self {
            secret: secret.into(),
            ttl_secs,
        }
    }

    /// Signer with a random secret. Tokens do not survive a restart.
    pub fn ephemeral(ttl_secs: u64) -> Self {
        let mut secret = Uuid::new_v4().into_bytes().to_vec();
        secret.extend_from_slice(Uuid::new_v4().as_bytes());
        Self::new(secret, ttl_secs)
    }

    fn mac(&self) -> TrackerResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| TrackerError::Other(anyhow::anyhow!("Invalid signing key: {}", e)))
    }

    pub fn issue(&self, user: &User) -> TrackerResult<(String, DateTime<Utc>)> {
        self.issue_at(user, Utc::now())
    }

    fn issue_at(&self, user: &User, now: DateTime<Utc>) -> TrackerResult<(String, DateTime<Utc>)> {
        let expires_at = i64::try_from(self.ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .ok_or_else(|| {
                TrackerError::validation(format!(
                    "Session lifetime of {} seconds is out of range",
                    self.ttl_secs
                ))
            })?;
        let claims = SessionClaims {
            sub: user.id,
            role: user.role,
            iat: now.timestamp(),
            exp: expires_at.timestamp(),
        };
        let payload = serde_json::to_vec(&claims).map_err(|e| TrackerError::Other(e.into()))?;
        let payload_part = URL_SAFE_NO_PAD.encode(payload);

        let mut mac = self.mac()?;
        mac.update(payload_part.as_bytes());
        let sig_part = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok((
            format!("{}.{}.{}", SESSION_VERSION, payload_part, sig_part),
            expires_at,
        ))
    }

    pub fn verify(&self, token: &str) -> TrackerResult<SessionClaims> {
        self.verify_at(token, Utc::now())
    }

    fn verify_at(&self, token: &str, now: DateTime<Utc>) -> TrackerResult<SessionClaims> {
        let invalid = || TrackerError::Unauthorized("Invalid token".into());
        let mut parts = token.split('.');
        let (Some(version), Some(payload_part), Some(sig_part), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };
        if version != SESSION_VERSION {
            return Err(invalid());
        }

        let signature = URL_SAFE_NO_PAD.decode(sig_part).map_err(|_| invalid())?;
        let mut mac = self.mac()?;
        mac.update(payload_part.as_bytes());
        mac.verify_slice(&signature).map_err(|_| invalid())?;

        let payload = URL_SAFE_NO_PAD.decode(payload_part).map_err(|_| invalid())?;
        let claims: SessionClaims = serde_json::from_slice(&payload).map_err(|_| invalid())?;
        if claims.exp <= now.timestamp() {
            return Err(TrackerError::Unauthorized("Token expired".into()));
        }
        Ok(claims)
    }
}

// ── API tokens ────────────────────────────────────────────────────────

/// Hex SHA-256 of a plaintext API token, as stored.
pub fn hash_api_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Fresh `kvy_<32 hex>` token and the record to persist for it.
pub fn generate_api_token(
    user_id: i64,
    name: &str,
    permissions: Vec<Permission>,
    expires_in_days: Option<u32>,
) -> TrackerResult<(String, NewApiToken)> {
    let expires_at = expires_in_days.map(api_token_expiry).transpose()?;
    let plaintext = format!("{}{}", API_TOKEN_PREFIX, Uuid::new_v4().simple());
    let record = NewApiToken {
        name: name.to_string(),
        user_id,
        token_hash: hash_api_token(&plaintext),
        prefix: plaintext.chars().take(API_TOKEN_DISPLAY_LEN).collect(),
        permissions,
        expires_at,
    };
    Ok((plaintext, record))
}

/// RFC 3339 instant `days` from now. `days` must lie in `1..=MAX_API_TOKEN_DAYS`.
fn api_token_expiry(days: u32) -> TrackerResult<String> {
    (1..=MAX_API_TOKEN_DAYS)
        .contains(&days)
        .then(|| Duration::try_days(i64::from(days)))
        .flatten()
        .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true))
        .ok_or_else(|| {
            TrackerError::validation(format!(
                "expires_in_days must be between 1 and {}",
                MAX_API_TOKEN_DAYS
            ))
        })
}

// ── Principal ─────────────────────────────────────────────────────────

/// The authenticated caller of a request.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: User,
    pub permissions: Vec<Permission>,
    /// Set when the request authenticated with an API token.
    pub token_id: Option<i64>,
}

impl Principal {
    pub fn from_user(user: User) -> Self {
        Self {
            permissions: user.role.permissions().to_vec(),
            user,
            token_id: None,
        }
    }

    pub fn has(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn is_admin(&self) -> bool {
        self.has(Permission::Admin)
    }

    pub fn require(&self, permission: Permission) -> TrackerResult<()> {
        if self.has(permission) {
            Ok(())
        } else {
            Err(TrackerError::Forbidden(format!(
                "Missing permission: {}",
                permission
            )))
        }
    }

    /// Owners may always act on their own records; admins on anyone's.
    pub fn require_owner_or_admin(&self, owner_id: Option<i64>) -> TrackerResult<()> {
        if self.is_admin() || owner_id == Some(self.user.id) {
            Ok(())
        } else {
            Err(TrackerError::Forbidden(
                "Only the owner or an admin may do this".into(),
            ))
        }
    }
}

/// Check credentials and issue a session token.
pub fn login(
    db: &TrackerDb,
    signer: &TokenSigner,
    email: &str,
    password: &str,
) -> TrackerResult<(String, DateTime<Utc>, User)> {
    let Some((user, hash)) = db.get_user_credentials(&email.trim().to_lowercase())? else {
        return Err(TrackerError::Unauthorized(BAD_CREDENTIALS.into()));
    };
    if !user.active || !verify_password(password, &hash) {
        return Err(TrackerError::Unauthorized(BAD_CREDENTIALS.into()));
    }
    let (token, expires_at) = signer.issue(&user)?;
    Ok((token, expires_at, user))
}

/// Resolve a bearer token to a principal.
pub fn authenticate(db: &TrackerDb, signer: &TokenSigner, bearer: &str) -> TrackerResult<Principal> {
    let bearer = bearer.trim();
    if bearer.starts_with(API_TOKEN_PREFIX) {
        return authenticate_api_token(db, bearer);
    }

    let claims = signer.verify(bearer)?;
    let user = active_user(db, claims.sub)?;
    Ok(Principal::from_user(user))
}

fn authenticate_api_token(db: &TrackerDb, bearer: &str) -> TrackerResult<Principal> {
    let token = db
        .get_api_token_by_hash(&hash_api_token(bearer))?
        .ok_or_else(|| TrackerError::Unauthorized("Invalid token".into()))?;
    if let Some(expires_at) = &token.expires_at {
        let expired = DateTime::parse_from_rfc3339(expires_at)
            .map(|at| at.with_timezone(&Utc) <= Utc::now())
            .unwrap_or(true);
        if expired {
            return Err(TrackerError::Unauthorized("Token expired".into()));
        }
    }
    let user = active_user(db, token.user_id)?;
    db.touch_api_token(token.id)?;

    let permissions = token
        .permissions
        .iter()
        .copied()
        .filter(|p| user.role.has(*p))
        .collect();
    Ok(Principal {
        user,
        permissions,
        token_id: Some(token.id),
    })
}

fn active_user(db: &TrackerDb, id: i64) -> TrackerResult<User> {
    match db.get_user(id)? {
        Some(user) if user.active => Ok(user),
        _ => Err(TrackerError::Unauthorized("Invalid token".into())),
    }
}
