//! Session Authorizer.
//!
//! A session is a short-lived capability that lets one address fetch keys
//! for any identity in one scope without signing every request. It is
//! created entirely client-side: the challenge nonce, the ephemeral
//! session signing key and the X25519 response key are all generated
//! locally. The user signs the resulting personal message once; after
//! that the session signs requests itself until its TTL elapses.
//!
//! Expiry is judged against the wall clock (client side) and the key
//! server's own clock (server side). It never gates access to content;
//! the ledger clock does that inside `seal_approve`.

use rand::RngCore;
use serde::{Deserialize, Serialize};

use tiergate_core::{Address, Ed25519PublicKey, Ed25519Signature, Keypair, ScopeId};

use crate::crypto::{X25519PublicKey, X25519StaticSecret};
use crate::error::{Result, SealError};

/// Longest session lifetime a key server accepts.
pub const MAX_SESSION_TTL_MINUTES: u32 = 30;

const CHALLENGE_LEN: usize = 16;

fn check_ttl(ttl_minutes: u32) -> Result<()> {
    if ttl_minutes == 0 || ttl_minutes > MAX_SESSION_TTL_MINUTES {
        return Err(SealError::InvalidTtl {
            got: ttl_minutes,
            max: MAX_SESSION_TTL_MINUTES,
        });
    }
    Ok(())
}

/// The fields a user signs to authorize a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct SessionTerms {
    user_key: Ed25519PublicKey,
    scope: ScopeId,
    session_key: Ed25519PublicKey,
    response_key: X25519PublicKey,
    created_at: i64,
    ttl_minutes: u32,
    challenge: [u8; CHALLENGE_LEN],
}

impl SessionTerms {
    fn expires_at(&self) -> i64 {
        self.created_at
            .saturating_add(i64::from(self.ttl_minutes) * 60_000)
    }

    fn personal_message(&self) -> Vec<u8> {
        format!(
            "tiergate session\n\
             address: {}\n\
             scope: {}\n\
             session key: {}\n\
             response key: {}\n\
             created: {}\n\
             ttl: {} min\n\
             challenge: {}",
            self.user_key.address().to_hex(),
            self.scope.to_hex(),
            self.session_key.to_hex(),
            hex::encode(self.response_key.as_bytes()),
            self.created_at,
            self.ttl_minutes,
            hex::encode(self.challenge),
        )
        .into_bytes()
    }
}

/// A client-held session, pending until the user's signature is attached.
pub struct SessionKey {
    terms: SessionTerms,
    session_keypair: Keypair,
    response_secret: X25519StaticSecret,
    signature: Option<Ed25519Signature>,
}

impl SessionKey {
    /// Create a pending session for the holder of `user_key`.
    ///
    /// `now_ms` is the client's wall clock.
    pub fn new(
        user_key: Ed25519PublicKey,
        scope: ScopeId,
        ttl_minutes: u32,
        now_ms: i64,
    ) -> Result<Self> {
        check_ttl(ttl_minutes)?;

        let mut challenge = [0u8; CHALLENGE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut challenge);
        let session_keypair = Keypair::generate();
        let response_secret = X25519StaticSecret::generate();

        Ok(Self {
            terms: SessionTerms {
                user_key,
                scope,
                session_key: session_keypair.public_key(),
                response_key: response_secret.public_key(),
                created_at: now_ms,
                ttl_minutes,
                challenge,
            },
            session_keypair,
            response_secret,
            signature: None,
        })
    }

    /// The address this session acts for.
    pub fn address(&self) -> Address {
        self.terms.user_key.address()
    }

    /// The scope this session is valid in.
    pub fn scope(&self) -> ScopeId {
        self.terms.scope
    }

    /// Wall-clock expiry (Unix ms).
    pub fn expires_at(&self) -> i64 {
        self.terms.expires_at()
    }

    /// The message the user must sign.
    pub fn personal_message(&self) -> Vec<u8> {
        self.terms.personal_message()
    }

    /// Attach the user's signature over [`Self::personal_message`].
    pub fn attach_signature(&mut self, signature: Ed25519Signature) -> Result<()> {
        self.terms
            .user_key
            .verify(&self.personal_message(), &signature)
            .map_err(|e| SealError::InvalidSignature(e.to_string()))?;
        self.signature = Some(signature);
        Ok(())
    }

    pub fn is_signed(&self) -> bool {
        self.signature.is_some()
    }

    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms >= self.expires_at()
    }

    /// The certificate key servers verify. Fails until signed.
    pub fn certificate(&self) -> Result<SessionCertificate> {
        let signature = self.signature.ok_or(SealError::SessionNotSigned)?;
        Ok(SessionCertificate {
            terms: self.terms.clone(),
            signature,
        })
    }

    /// Sign a request body with the session key.
    pub fn sign_request(&self, message: &[u8]) -> Ed25519Signature {
        self.session_keypair.sign(message)
    }

    /// Public half of the response key.
    pub fn response_public(&self) -> X25519PublicKey {
        self.terms.response_key
    }

    /// Secret that unwraps key shares addressed to this session.
    pub fn response_secret(&self) -> &X25519StaticSecret {
        &self.response_secret
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("address", &self.address())
            .field("scope", &self.terms.scope)
            .field("expires_at", &self.expires_at())
            .field("signed", &self.is_signed())
            .finish()
    }
}

/// A signed session, as presented to key servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCertificate {
    terms: SessionTerms,
    signature: Ed25519Signature,
}

impl SessionCertificate {
    /// The address the session acts for.
    pub fn address(&self) -> Address {
        self.terms.user_key.address()
    }

    pub fn scope(&self) -> ScopeId {
        self.terms.scope
    }

    pub fn expires_at(&self) -> i64 {
        self.terms.expires_at()
    }

    /// Key that unwraps responses to this session.
    pub fn response_key(&self) -> X25519PublicKey {
        self.terms.response_key
    }

    /// Check the user's signature, the TTL bound and expiry against `now_ms`.
    pub fn verify(&self, now_ms: i64) -> Result<()> {
        check_ttl(self.terms.ttl_minutes)?;
        self.terms
            .user_key
            .verify(&self.terms.personal_message(), &self.signature)
            .map_err(|e| SealError::InvalidSignature(e.to_string()))?;

        if now_ms >= self.expires_at() {
            return Err(SealError::SessionExpired {
                expired_at: self.expires_at(),
            });
        }
        Ok(())
    }

    /// Check a request signature made with the session key.
    pub fn verify_request(&self, message: &[u8], signature: &Ed25519Signature) -> Result<()> {
        self.terms
            .session_key
            .verify(message, signature)
            .map_err(|e| SealError::InvalidSignature(e.to_string()))
    }
}
