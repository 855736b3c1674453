//! Short-lived per-peer authentication tokens (spec.md §3, §4.5, §4.6).
//!
//! A token is a digest of a rotating secret mixed with the requesting
//! peer's compact IP. Two secrets are kept live at once so a rotation does
//! not instantly invalidate tokens issued moments before it.

use crate::config::TOKEN_LEN;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

/// Opaque token bytes, sized to `TOKEN_LEN` (spec.md §3, §6).
pub type Token = [u8; TOKEN_LEN];

fn digest(secret: &[u8; 32], ip: Ipv4Addr) -> Token {
    let mut hasher = Sha256::new();
    hasher.update(secret);
    hasher.update(ip.octets());
    let first = hasher.finalize();

    let mut hasher2 = Sha256::new();
    hasher2.update(secret);
    hasher2.update(first);
    let second = hasher2.finalize();

    let mut out = [0u8; TOKEN_LEN];
    out[..32].copy_from_slice(&first);
    out[32..].copy_from_slice(&second[..TOKEN_LEN - 32]);
    out
}

/// Holds the current and previous token secrets and rotates them on a timer.
pub struct TokenSecrets {
    current: [u8; 32],
    previous: Option<[u8; 32]>,
    last_rotation: Instant,
    refresh_interval: Duration,
    started_at: Instant,
}

impl TokenSecrets {
    pub fn new(refresh_interval: Duration) -> Self {
        let now = Instant::now();
        TokenSecrets {
            current: random_secret(),
            previous: None,
            last_rotation: now,
            refresh_interval,
            started_at: now,
        }
    }

    /// Rotates the secret if `refresh_interval` has elapsed since the last
    /// rotation. Call periodically from the node's event loop.
    pub fn maybe_rotate(&mut self) {
        if self.last_rotation.elapsed() >= self.refresh_interval {
            self.previous = Some(self.current);
            self.current = random_secret();
            self.last_rotation = Instant::now();
        }
    }

    /// Issues a token for the given requester IP, bound to the current secret.
    pub fn issue(&self, ip: Ipv4Addr) -> Token {
        digest(&self.current, ip)
    }

    /// Verifies a token against the current secret, and (if
    /// `accept_previous` is set) the previous one, plus the startup grace
    /// window documented in spec.md §4.6/§7.
    pub fn verify(&self, token: &Token, ip: Ipv4Addr, accept_previous: bool) -> bool {
        if *token == digest(&self.current, ip) {
            return true;
        }
        if accept_previous {
            if let Some(prev) = self.previous {
                if *token == digest(&prev, ip) {
                    return true;
                }
            }
        }
        false
    }

    /// Whether we are still inside the startup grace window, during which
    /// token verification is relaxed entirely (spec.md §4.6, §7).
    pub fn in_startup_grace(&self, grace: Duration) -> bool {
        self.started_at.elapsed() < grace
    }
}

fn random_secret() -> [u8; 32] {
    let mut secret = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut secret);
    secret
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_verifies_under_current_secret() {
        let secrets = TokenSecrets::new(Duration::from_secs(300));
        let ip = Ipv4Addr::new(1, 2, 3, 4);
        let token = secrets.issue(ip);
        assert!(secrets.verify(&token, ip, true));
        assert!(secrets.verify(&token, ip, false));
    }

    #[test]
    fn token_bound_to_requester_ip() {
        let secrets = TokenSecrets::new(Duration::from_secs(300));
        let token = secrets.issue(Ipv4Addr::new(1, 2, 3, 4));
        assert!(!secrets.verify(&token, Ipv4Addr::new(5, 6, 7, 8), true));
    }

    #[test]
    fn previous_secret_accepted_only_once_rotated_and_flagged() {
        let mut secrets = TokenSecrets::new(Duration::from_millis(0));
        let ip = Ipv4Addr::new(1, 2, 3, 4);
        let old_token = secrets.issue(ip);

        secrets.maybe_rotate();
        assert!(secrets.verify(&old_token, ip, true));
        assert!(!secrets.verify(&old_token, ip, false));

        secrets.maybe_rotate();
        assert!(!secrets.verify(&old_token, ip, true));
    }
}
