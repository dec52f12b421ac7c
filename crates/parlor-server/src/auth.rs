//! Accounts, password hashing and bearer tokens.

use base64::engine::general_purpose::STANDARD_NO_PAD;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use parlor_core::UserId;
use parlor_store::{StoreError, UserRepo, UserRow};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, warn};

/// PBKDF2 iterations for new hashes. Stored hashes carry their own count.
pub const DEFAULT_ROUNDS: u32 = 100_000;
const SCHEME: &str = "pbkdf2-sha256";
const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("username already taken")]
    UsernameTaken,

    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("token expired")]
    TokenExpired,

    #[error("token invalid: {0}")]
    TokenInvalid(String),

    #[error("token does not belong to client {0}")]
    WrongClient(UserId),

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict(_) => AuthError::UsernameTaken,
            other => AuthError::Store(other),
        }
    }
}

/// Hash a password as `pbkdf2-sha256$<rounds>$<salt>$<key>`.
pub fn hash_password(password: &str, rounds: u32) -> String {
    let salt: [u8; SALT_LEN] = rand::random();
    let key = derive(password, &salt, rounds);
    format!(
        "{SCHEME}${rounds}${}${}",
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(key)
    )
}

/// Check a password against an encoded hash. Malformed hashes never match.
pub fn verify_password(password: &str, encoded: &str) -> bool {
    let mut parts = encoded.split('$');
    let (Some(SCHEME), Some(rounds), Some(salt), Some(key), None) =
        (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return false;
    };
    let (Ok(rounds), Ok(salt), Ok(expected)) = (
        rounds.parse::<u32>(),
        STANDARD_NO_PAD.decode(salt),
        STANDARD_NO_PAD.decode(key),
    ) else {
        return false;
    };
    let actual = derive(password, &salt, rounds);
    constant_time_eq(&actual, &expected)
}

fn derive(password: &str, salt: &[u8], rounds: u32) -> [u8; KEY_LEN] {
    let mut key = [0u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, rounds.max(1), &mut key);
    key
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// JWT claims. `sub` is the username, `uid` the numeric identity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub uid: i64,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and validates HS256 access tokens.
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
    ttl_secs: i64,
}

impl TokenIssuer {
    pub fn new(secret: &[u8], ttl_minutes: i64) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            ttl_secs: ttl_minutes * 60,
        }
    }

    /// Use the configured secret, or a random per-process one.
    pub fn from_config(secret: Option<&str>, ttl_minutes: i64) -> Self {
        match secret {
            Some(s) => Self::new(s.as_bytes(), ttl_minutes),
            None => {
                warn!("no JWT secret configured, tokens will not survive a restart");
                let key: [u8; 32] = rand::random();
                Self::new(&key, ttl_minutes)
            }
        }
    }

    pub fn issue(&self, user: &UserRow) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        self.encode_claims(&Claims {
            sub: user.username.clone(),
            uid: user.id.get(),
            iat: now,
            exp: now + self.ttl_secs,
        })
    }

    pub fn encode_claims(&self, claims: &Claims) -> Result<String, AuthError> {
        encode(&Header::default(), claims, &self.encoding)
            .map_err(|e| AuthError::TokenInvalid(e.to_string()))
    }

    pub fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenInvalid(e.to_string()),
            })
    }
}

/// Sign-up, login, and the admission gate for streaming connections.
pub struct AuthService {
    users: UserRepo,
    tokens: TokenIssuer,
    rounds: u32,
}

impl AuthService {
    pub fn new(users: UserRepo, tokens: TokenIssuer) -> Self {
        Self {
            users,
            tokens,
            rounds: DEFAULT_ROUNDS,
        }
    }

    /// Lower the PBKDF2 cost for new hashes (tests).
    pub fn with_rounds(mut self, rounds: u32) -> Self {
        self.rounds = rounds;
        self
    }

    pub fn tokens(&self) -> &TokenIssuer {
        &self.tokens
    }

    pub fn signup(&self, username: &str, password: &str) -> Result<UserRow, AuthError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(AuthError::MissingField("username"));
        }
        if password.is_empty() {
            return Err(AuthError::MissingField("password"));
        }
        let user = self.users.create(username, &hash_password(password, self.rounds))?;
        info!(user_id = %user.id, username = %user.username, "user created");
        Ok(user)
    }

    /// Verify credentials and issue an access token.
    pub fn login(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let user = self
            .users
            .get_by_username(username.trim())?
            .filter(|u| verify_password(password, &u.password_hash))
            .ok_or_else(|| {
                warn!(username, "login failed");
                AuthError::InvalidCredentials
            })?;
        self.tokens.issue(&user)
    }

    /// Admit a streaming client: the token must be valid and issued to
    /// `client_id`.
    pub fn admit(&self, client_id: UserId, token: &str) -> Result<Claims, AuthError> {
        let claims = self.tokens.validate(token)?;
        if claims.uid != client_id.get() {
            return Err(AuthError::WrongClient(client_id));
        }
        Ok(claims)
    }
}
