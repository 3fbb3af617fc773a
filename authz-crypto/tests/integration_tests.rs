use authz_crypto::jwe::JweStrategy;
use authz_crypto::kdf::{derive_content_encryption_key, derive_integrity_key};
use authz_crypto::token_binding::bind_claims;
use authz_crypto::{
    BlockEncryptionAlgorithm, CryptoError, InMemoryKeyProvider, Jwe, JweHeader, JweStrategies,
    JsonWebKey, Jwt, JwtClaims, JwtHeader, KeyEncryptionAlgorithm, KeyProvider,
    SignatureAlgorithm, TokenBindingMessage, base64url, jws,
};
use serde_json::json;
use std::sync::{Arc, OnceLock};

fn setup_logger() {
    let _ = env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init();
}

/// RSA key generation is slow in debug builds, share one key across tests
fn rsa_key() -> &'static JsonWebKey {
    static KEY: OnceLock<JsonWebKey> = OnceLock::new();
    KEY.get_or_init(|| JsonWebKey::generate_rsa("enc-rsa", 2048).expect("RSA key generation"))
}

fn sample_claims() -> JwtClaims {
    let mut claims = JwtClaims::new();
    claims.set("iss", "https://as.example.com");
    claims.set("aud", json!(["client-1", "client-2"]));
    claims.set("sub", "alice");
    claims.set("iat", 1_700_000_000i64);
    claims.set("exp", 1_700_003_600i64);
    claims.set("jti", "4b3e2f");
    claims.set("custom", json!({"nested": [1, 2, 3]}));
    claims
}

#[test]
fn test_parse_serialize_round_trip_for_every_signature_algorithm() {
    setup_logger();
    let secret = JsonWebKey::octet("hs", vec![42u8; 64]);
    for algorithm in [
        SignatureAlgorithm::None,
        SignatureAlgorithm::HS256,
        SignatureAlgorithm::HS384,
        SignatureAlgorithm::HS512,
        SignatureAlgorithm::RS256,
    ] {
        let key = if algorithm.is_rsa() { rsa_key() } else { &secret };
        let jwt = jws::sign(JwtHeader::new(algorithm), sample_claims(), algorithm, key).unwrap();
        let parsed = Jwt::parse(&jwt.serialize()).unwrap();

        assert_eq!(parsed.header(), jwt.header(), "{algorithm}");
        assert_eq!(parsed.claims(), jwt.claims(), "{algorithm}");
        assert_eq!(parsed.signing_input(), jwt.signing_input(), "{algorithm}");
        if algorithm != SignatureAlgorithm::None {
            jws::verify(&parsed, key).unwrap();
        }
    }
}

#[test]
fn test_jwe_round_trip_for_registered_pairs() {
    setup_logger();
    let strategies = JweStrategies::with_defaults();
    let payload = b"{\"sub\":\"alice\"}";

    for alg in KeyEncryptionAlgorithm::ALL {
        for enc in BlockEncryptionAlgorithm::ALL {
            if !strategies.supports(alg, enc) {
                continue;
            }
            let key = match alg {
                KeyEncryptionAlgorithm::Dir => JsonWebKey::octet("dir", vec![7u8; enc.key_len()]),
                _ => rsa_key().clone(),
            };
            let header = JweHeader::new(alg, enc).with_kid(key.kid.clone());
            let jwe = strategies.encrypt(&header, payload, &key).unwrap();

            let parsed = Jwe::parse(&jwe.serialize()).unwrap();
            assert_eq!(parsed.header(), &header);
            let decrypted = strategies.decrypt(&parsed, &key).unwrap();
            assert_eq!(decrypted, payload, "{alg} / {enc}");
        }
    }
}

#[test]
fn test_unregistered_pair_is_unsupported() {
    let strategies = JweStrategies::with_defaults();
    let key = JsonWebKey::octet("dir", vec![1u8; 32]);
    let header = JweHeader::new(
        KeyEncryptionAlgorithm::Dir,
        BlockEncryptionAlgorithm::A128CbcPlusHs256,
    );
    let err = strategies.encrypt(&header, b"payload", &key).unwrap_err();
    assert!(matches!(err, CryptoError::UnsupportedAlgorithm(_)), "{err}");

    let empty = JweStrategies::empty();
    let header = JweHeader::new(KeyEncryptionAlgorithm::Dir, BlockEncryptionAlgorithm::A128Gcm);
    let key = JsonWebKey::octet("dir", vec![1u8; 16]);
    assert!(matches!(
        empty.encrypt(&header, b"payload", &key),
        Err(CryptoError::UnsupportedAlgorithm(_))
    ));
}

#[test]
fn test_custom_strategy_is_dispatched_by_value() {
    struct Reversing;

    impl JweStrategy for Reversing {
        fn encrypt(
            &self,
            header: &JweHeader,
            plaintext: &[u8],
            key: &JsonWebKey,
        ) -> Result<Jwe, CryptoError> {
            let inner = JweStrategies::with_defaults();
            let reversed: Vec<u8> = plaintext.iter().rev().copied().collect();
            inner.encrypt(header, &reversed, key)
        }

        fn decrypt(&self, jwe: &Jwe, key: &JsonWebKey) -> Result<Vec<u8>, CryptoError> {
            let inner = JweStrategies::with_defaults();
            Ok(inner.decrypt(jwe, key)?.into_iter().rev().collect())
        }
    }

    let mut strategies = JweStrategies::empty();
    strategies.register(
        KeyEncryptionAlgorithm::Dir,
        BlockEncryptionAlgorithm::A256Gcm,
        Arc::new(Reversing),
    );
    let key = JsonWebKey::octet("dir", vec![3u8; 32]);
    let header = JweHeader::new(KeyEncryptionAlgorithm::Dir, BlockEncryptionAlgorithm::A256Gcm);
    let jwe = strategies.encrypt(&header, b"abc", &key).unwrap();

    assert_eq!(JweStrategies::with_defaults().decrypt(&jwe, &key).unwrap(), b"cba");
    assert_eq!(strategies.decrypt(&jwe, &key).unwrap(), b"abc");
}

#[test]
fn test_tampered_jwe_fails_to_decrypt() {
    let strategies = JweStrategies::with_defaults();
    for enc in [
        BlockEncryptionAlgorithm::A128Gcm,
        BlockEncryptionAlgorithm::A128CbcHs256,
        BlockEncryptionAlgorithm::A256CbcHs512,
    ] {
        let key = JsonWebKey::octet("dir", vec![9u8; enc.key_len()]);
        let header = JweHeader::new(KeyEncryptionAlgorithm::Dir, enc);
        let serialized = strategies.encrypt(&header, b"top secret", &key).unwrap().serialize();

        let mut segments: Vec<String> = serialized.split('.').map(str::to_string).collect();
        let mut ciphertext = base64url::decode(&segments[3]).unwrap();
        ciphertext[0] ^= 0x01;
        segments[3] = base64url::encode(&ciphertext);

        let tampered = Jwe::parse(&segments.join(".")).unwrap();
        assert!(
            matches!(strategies.decrypt(&tampered, &key), Err(CryptoError::Decryption(_))),
            "{enc}"
        );
    }
}

#[test]
fn test_legacy_composite_tag_covers_encrypted_key() {
    let strategies = JweStrategies::with_defaults();
    let key = rsa_key();
    let header = JweHeader::new(
        KeyEncryptionAlgorithm::RsaOaep256,
        BlockEncryptionAlgorithm::A256CbcPlusHs512,
    );
    let jwe = strategies.encrypt(&header, b"legacy", key).unwrap();
    assert_eq!(jwe.tag().len(), 64);
    assert_eq!(jwe.iv().len(), 16);

    let mut segments: Vec<String> = jwe.serialize().split('.').map(str::to_string).collect();
    let mut tag = base64url::decode(&segments[4]).unwrap();
    tag[10] ^= 0xFF;
    segments[4] = base64url::encode(&tag);
    let tampered = Jwe::parse(&segments.join(".")).unwrap();
    assert!(matches!(
        strategies.decrypt(&tampered, key),
        Err(CryptoError::Decryption(_))
    ));
}

#[test]
fn test_dir_key_length_must_match_encryption() {
    let strategies = JweStrategies::with_defaults();
    let key = JsonWebKey::octet("dir", vec![1u8; 16]);
    let header = JweHeader::new(KeyEncryptionAlgorithm::Dir, BlockEncryptionAlgorithm::A256Gcm);
    assert!(matches!(
        strategies.encrypt(&header, b"x", &key),
        Err(CryptoError::InvalidParameter(_))
    ));
}

#[test]
fn test_nested_jwt_in_jwe() {
    let provider = InMemoryKeyProvider::new()
        .with_key(JsonWebKey::octet("sig", vec![5u8; 32]))
        .with_key(JsonWebKey::octet("enc", vec![6u8; 32]));
    let signing_key = provider.key("sig").unwrap();
    let encryption_key = provider.key("enc").unwrap();

    let jwt = jws::sign(
        JwtHeader::new(SignatureAlgorithm::HS256),
        sample_claims(),
        SignatureAlgorithm::HS256,
        &signing_key,
    )
    .unwrap();
    let strategies = JweStrategies::with_defaults();
    let header = JweHeader::new(KeyEncryptionAlgorithm::Dir, BlockEncryptionAlgorithm::A256Gcm)
        .with_kid("enc");
    let jwe = strategies.encrypt_jwt(header, &jwt, &encryption_key).unwrap();
    assert_eq!(jwe.header().cty.as_deref(), Some("JWT"));

    let inner = strategies.decrypt(&Jwe::parse(&jwe.serialize()).unwrap(), &encryption_key).unwrap();
    let nested = Jwt::parse(std::str::from_utf8(&inner).unwrap()).unwrap();
    jws::verify(&nested, &signing_key).unwrap();
    assert_eq!(nested.claims().subject(), Some("alice"));
}

#[test]
fn test_kdf_outputs_for_fixed_master_key() {
    let cmk: Vec<u8> = (0u8..32).collect();
    let enc = BlockEncryptionAlgorithm::A128CbcPlusHs256;
    let cek = derive_content_encryption_key(&cmk, enc).unwrap();
    let cik = derive_integrity_key(&cmk, enc).unwrap();
    assert_eq!((cek.len(), cik.len()), (16, 32));
    assert_ne!(cek, cik[..16].to_vec());
    assert_eq!(cek, derive_content_encryption_key(&cmk, enc).unwrap());
}

#[test]
fn test_token_binding_hash_in_signed_token() {
    // provided binding, ecdsap256, 65-byte point, 64-byte signature, no extensions
    let mut binding = vec![0u8, 2, 0, 66, 65];
    binding.extend_from_slice(&[4u8; 65]);
    binding.extend_from_slice(&[0, 64]);
    binding.extend_from_slice(&[1u8; 64]);
    binding.extend_from_slice(&[0, 0]);
    let mut message = (binding.len() as u16).to_be_bytes().to_vec();
    message.extend_from_slice(&binding);

    let parsed = TokenBindingMessage::from_base64url(&base64url::encode(&message)).unwrap();
    let id = &parsed.provided().unwrap().id;

    let mut claims = sample_claims();
    bind_claims(&mut claims, "tbh", id).unwrap();
    let key = JsonWebKey::octet("hs", vec![1u8; 32]);
    let jwt = jws::sign(JwtHeader::new(SignatureAlgorithm::HS256), claims, SignatureAlgorithm::HS256, &key)
        .unwrap();

    let parsed_jwt = Jwt::parse(&jwt.serialize()).unwrap();
    assert_eq!(
        parsed_jwt.claims().get("cnf").and_then(|cnf| cnf.get("tbh")),
        Some(&json!(id.confirmation_hash()))
    );
}
