use crate::fixture::{App, SECRET};
use dexcloak_core::crypto::{decrypt_ecb, decrypt_string, encrypt_ecb, encrypt_string, hashed_identifier};
use dexcloak_core::Session;
use dexcloak_utils::errors::CryptoError;

#[test]
fn payloads_round_trip_under_the_session_secret() {
    let run = App::new().prepare(&[]);
    let session = Session::new(run.config.session.clone(), Box::new(run.toolchain.clone())).unwrap();
    let key = session.encryption_secret().as_bytes();
    assert_eq!(key, SECRET.as_bytes());

    for len in [0usize, 1, 15, 16, 17, 4096] {
        let payload: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
        let sealed = encrypt_ecb(key, &payload).unwrap();
        assert_eq!(sealed.len() % 16, 0);
        assert!(sealed.len() > payload.len());
        assert_eq!(decrypt_ecb(key, &sealed).unwrap(), payload);
    }
}

#[test]
fn generated_secrets_are_32_characters() {
    let mut run = App::new().prepare(&[]);
    run.config.session.secret = None;
    let session = Session::new(run.config.session.clone(), Box::new(run.toolchain.clone())).unwrap();
    assert_eq!(session.encryption_secret().len(), 32);
    assert!(session.encryption_secret().chars().all(|c| c.is_ascii_alphanumeric()));
}

#[test]
fn strings_round_trip_through_hex() {
    let sealed = encrypt_string(SECRET, "päßwörd \"quoted\"\n").unwrap();
    assert!(sealed.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(decrypt_string(SECRET, &sealed).unwrap(), "päßwörd \"quoted\"\n");
    assert!(matches!(decrypt_string(SECRET, "abc"), Err(CryptoError::HexDecode(_))));
}

#[test]
fn identifiers_are_stable() {
    let first = hashed_identifier("m", "onCreate");
    assert_eq!(first, hashed_identifier("m", "onCreate"));
    assert_eq!(first.len(), 9);
    assert!(first.starts_with('m'));
    assert_ne!(first, hashed_identifier("m", "onResume"));
}
