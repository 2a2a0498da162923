//! Player identities
//!
//! The coordinator only asks whether a player id is known. The registry
//! below issues a bearer token per login and maps it back to a player id;
//! it lives outside the coordinator and is shared by the HTTP and socket
//! handlers.

use crate::types::PlayerId;
use rand::Rng;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

/// Safe character set for tokens (excludes 0/O, 1/I/L to avoid confusion)
const TOKEN_CHARS: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZabcdefghjkmnpqrstuvwxyz23456789";
const TOKEN_LENGTH: usize = 24;

/// "Is this player id authenticated?"
pub trait IdentityCheck: Send + Sync {
    fn is_known(&self, player_id: &PlayerId) -> bool;
}

impl<F> IdentityCheck for F
where
    F: Fn(&PlayerId) -> bool + Send + Sync,
{
    fn is_known(&self, player_id: &PlayerId) -> bool {
        self(player_id)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Credentials {
    pub token: String,
    pub player_id: PlayerId,
}

#[derive(Debug, Default)]
struct Identities {
    by_token: HashMap<String, PlayerId>,
    known: HashSet<PlayerId>,
}

#[derive(Debug, Default)]
pub struct IdentityRegistry {
    inner: RwLock<Identities>,
}

fn generate_token() -> String {
    let mut rng = rand::rng();
    (0..TOKEN_LENGTH)
        .map(|_| TOKEN_CHARS[rng.random_range(0..TOKEN_CHARS.len())] as char)
        .collect()
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh token and player id
    pub fn issue(&self) -> Credentials {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let token = loop {
            let token = generate_token();
            if !inner.by_token.contains_key(&token) {
                break token;
            }
        };
        let player_id = ulid::Ulid::new().to_string();

        inner.by_token.insert(token.clone(), player_id.clone());
        inner.known.insert(player_id.clone());

        Credentials { token, player_id }
    }

    pub fn resolve(&self, token: &str) -> Option<PlayerId> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_token
            .get(token)
            .cloned()
    }

    /// Forget a token and the identity behind it
    pub fn revoke(&self, token: &str) -> Option<PlayerId> {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let player_id = inner.by_token.remove(token)?;
        inner.known.remove(&player_id);
        Some(player_id)
    }
}

impl IdentityCheck for IdentityRegistry {
    fn is_known(&self, player_id: &PlayerId) -> bool {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .known
            .contains(player_id)
    }
}
