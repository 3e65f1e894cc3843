//! End-to-end token flows across key rotation, tampering and threads.

#![allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::Rng;

use crumb_crypto::{
    BLOCK_SIZE, Clock, KeyManager, ManualClock, MissingKeyPolicy, PAD_LEN, RotationSchedule,
    TokenError, TokenPolicy, TokenService, rotate_and_retire,
};

const T: i64 = 1_700_000_000;

fn service_at(now: i64, policy: TokenPolicy) -> (TokenService, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(now));
    let keys = KeyManager::with_clock(
        MissingKeyPolicy::FailClosed,
        Arc::clone(&clock) as Arc<dyn Clock>,
    );
    keys.set(b"0123456789012345").unwrap();
    (TokenService::new(Arc::new(keys), policy), clock)
}

fn no_expiry() -> TokenPolicy {
    TokenPolicy {
        login_max_age: None,
        ..TokenPolicy::default()
    }
}

fn flip_bit(token: &str, bit: usize) -> String {
    let mut bytes = STANDARD.decode(token).unwrap();
    bytes[bit / 8] ^= 1u8 << (bit % 8);
    STANDARD.encode(bytes)
}

#[test]
fn single_bit_flips_never_resolve_to_original_subject() {
    let (service, _) = service_at(T, no_expiry());
    let token = service.issue_login_token(1234).unwrap();
    let total_bits = STANDARD.decode(&token).unwrap().len() * 8;

    let mut rejected = 0usize;
    for bit in 0..total_bits {
        match service.resolve_login_token(&flip_bit(&token, bit)) {
            Ok(resolved) => assert_ne!(resolved.subject_id, 1234, "bit {bit} went unnoticed"),
            Err(_) => rejected += 1,
        }
    }
    assert!(rejected > total_bits / 2, "only {rejected}/{total_bits} flips rejected");
}

#[test]
fn random_tampering_is_mostly_rejected() {
    let (service, _) = service_at(T, no_expiry());
    let mut rng = rand::thread_rng();
    let trials = 500;

    let mut rejected = 0usize;
    for _ in 0..trials {
        let token = service.issue_login_token(1234).unwrap();
        let bits = STANDARD.decode(&token).unwrap().len() * 8;
        match service.resolve_login_token(&flip_bit(&token, rng.gen_range(0..bits))) {
            Ok(resolved) => assert_ne!(resolved.subject_id, 1234),
            Err(_) => rejected += 1,
        }
    }
    assert!(rejected * 4 > trials * 3, "only {rejected}/{trials} rejected");
}

/// CFB without an authentication tag is malleable: flipping the last
/// ciphertext bit flips the low bit of the subject id and still parses.
#[test]
fn crafted_flip_in_subject_is_not_detected() {
    let (service, _) = service_at(T, no_expiry());
    let token = service.issue_login_token(1234).unwrap();

    // pad(8) + a2 61 74 1a xx xx xx xx 61 75 19 04 d2
    let last = BLOCK_SIZE + PAD_LEN + 12;
    assert_eq!(STANDARD.decode(&token).unwrap().len(), last + 1);

    let forged = flip_bit(&token, last * 8);
    assert_eq!(service.resolve_login_token(&forged).unwrap().subject_id, 1235);
}

/// Turning the `"u"` text key header (0x61) into a byte string header (0x41)
/// touches only the final partial block and must still be rejected.
#[test]
fn byte_string_key_flip_is_rejected() {
    let (service, _) = service_at(T, no_expiry());
    let token = service.issue_login_token(1234).unwrap();

    // plaintext offset of the "u" key header: pad(8) + a2 61 74 1a xx xx xx xx
    let key_header = BLOCK_SIZE + PAD_LEN + 8;
    let forged = flip_bit(&token, key_header * 8 + 5);
    assert!(matches!(
        service.resolve_login_token(&forged),
        Err(TokenError::InvalidToken)
    ));
}

#[test]
fn malformed_inputs_are_typed_errors() {
    let (service, _) = service_at(T, TokenPolicy::default());
    let long_garbage = "A".repeat(4096);
    let inputs = [
        "not-base64!!",
        "c2hvcnQ=",
        "",
        "====",
        "AAAAAAAAAAAAAAAAAAAAAA==",
        long_garbage.as_str(),
    ];
    for input in inputs {
        assert!(matches!(
            service.resolve_login_token(input),
            Err(TokenError::InvalidToken)
        ));
        assert!(!service.verify_nonce_default(input));
    }
}

#[test]
fn tokens_survive_rotation_until_retired() {
    let (service, clock) = service_at(T, TokenPolicy::default());
    let schedule = RotationSchedule {
        interval: Duration::from_secs(3600),
        retention: Duration::from_secs(2 * 3600),
    };
    let login = service.issue_login_token(42).unwrap();
    let nonce = service.issue_nonce().unwrap();

    clock.advance(3600);
    rotate_and_retire(service.keys(), &schedule).unwrap();
    assert!(service.verify_nonce(&nonce, Duration::from_secs(7200)));
    let resolved = service.resolve_login_token(&login).unwrap();
    assert!(resolved.needs_reissue());
    let refreshed = service.refresh_login_token(&resolved).unwrap().unwrap();

    clock.advance(3600);
    rotate_and_retire(service.keys(), &schedule).unwrap();
    clock.advance(3600);
    let outcome = rotate_and_retire(service.keys(), &schedule).unwrap();
    assert!(outcome.retired >= 1);

    assert!(matches!(
        service.resolve_login_token(&login),
        Err(TokenError::InvalidToken)
    ));
    // The refreshed token was issued under a key still inside retention.
    assert_eq!(service.resolve_login_token(&refreshed).unwrap().subject_id, 42);
}

#[test]
fn independent_services_do_not_share_keys() {
    let a = TokenService::new(Arc::new(KeyManager::default()), TokenPolicy::default());
    let b = TokenService::new(Arc::new(KeyManager::default()), TokenPolicy::default());
    let token = a.issue_login_token(1).unwrap();
    assert_eq!(a.resolve_login_token(&token).unwrap().subject_id, 1);
    assert!(b.resolve_login_token(&token).is_err());
}

#[test]
fn concurrent_issue_and_resolve() {
    let service = Arc::new(TokenService::new(
        Arc::new(KeyManager::default()),
        TokenPolicy::default(),
    ));
    service.generate_key().unwrap();

    let handles: Vec<_> = (0..8i64)
        .map(|worker| {
            let s = Arc::clone(&service);
            thread::spawn(move || {
                let mut tokens = Vec::with_capacity(200);
                for i in 0..200 {
                    let subject = worker * 1_000 + i;
                    let token = s.issue_login_token(subject).unwrap();
                    assert_eq!(s.resolve_login_token(&token).unwrap().subject_id, subject);
                    assert!(s.verify_nonce_default(&s.issue_nonce().unwrap()));
                    tokens.push(token);
                }
                tokens
            })
        })
        .collect();

    let mut all = std::collections::HashSet::new();
    for h in handles {
        for token in h.join().unwrap() {
            assert!(all.insert(token), "duplicate token issued");
        }
    }
    assert_eq!(all.len(), 8 * 200);
}

#[test]
fn concurrent_rotation_keeps_fresh_tokens_valid() {
    let service = Arc::new(TokenService::new(
        Arc::new(KeyManager::from_key(&[5u8; 32]).unwrap()),
        TokenPolicy::default(),
    ));

    let rotator = {
        let keys = Arc::clone(service.keys());
        thread::spawn(move || {
            for _ in 0..50 {
                keys.rotate().unwrap();
            }
        })
    };
    let workers: Vec<_> = (0..4)
        .map(|_| {
            let s = Arc::clone(&service);
            thread::spawn(move || {
                for subject in 0..200 {
                    let token = s.issue_login_token(subject).unwrap();
                    assert_eq!(s.resolve_login_token(&token).unwrap().subject_id, subject);
                }
            })
        })
        .collect();

    rotator.join().unwrap();
    for w in workers {
        w.join().unwrap();
    }
    assert_eq!(service.keys().len(), 51);
}
