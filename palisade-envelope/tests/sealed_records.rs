use palisade_envelope::{
    aead_open, derive_master_key, derive_record_key, SecureRecord, SALT_BYTES,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Props {
    #[serde(rename = "a")]
    secret_name: String,
    #[serde(rename = "b")]
    #[serde(with = "uuid::serde::compact")]
    device_id: Uuid,
    #[serde(rename = "c")]
    session_context_id: i64,
    #[serde(rename = "d")]
    #[serde(with = "serde_bytes")]
    long_term_public: Vec<u8>,
}

fn props() -> Props {
    Props {
        secret_name: "alice".into(),
        device_id: Uuid::new_v4(),
        session_context_id: 12345,
        long_term_public: vec![0xAB; 32],
    }
}

#[test]
fn password_derived_key_round_trips_a_record() {
    let key = derive_master_key(b"correct horse", &[5u8; SALT_BYTES]).unwrap();
    let original = props();
    let record = SecureRecord::new(Uuid::new_v4(), &original, &key).unwrap();
    assert_eq!(record.props::<Props>(&key), Some(original));
}

#[test]
fn wrong_password_yields_none() {
    let key = derive_master_key(b"correct horse", &[5u8; SALT_BYTES]).unwrap();
    let other = derive_master_key(b"battery staple", &[5u8; SALT_BYTES]).unwrap();
    let record = SecureRecord::new(Uuid::new_v4(), &props(), &key).unwrap();
    assert!(record.props::<Props>(&other).is_none());
}

#[test]
fn coding_keys_are_single_letter_and_ordered() {
    // The sealed document is a frozen wire contract: CBOR map with the
    // obfuscated one-letter keys in declaration order.
    let key = [9u8; 32];
    let id = Uuid::new_v4();
    let record = SecureRecord::new(id, &props(), &key).unwrap();

    let record_key = derive_record_key(&key, id.as_bytes()).unwrap();
    let document = aead_open(&record_key, record.sealed_bytes(), id.as_bytes()).unwrap();
    let value: serde_cbor::Value = serde_cbor::from_slice(&document).unwrap();

    let serde_cbor::Value::Map(map) = value else {
        panic!("sealed document is not a CBOR map");
    };
    let keys: Vec<String> = map
        .keys()
        .map(|k| match k {
            serde_cbor::Value::Text(s) => s.clone(),
            other => panic!("non-text coding key: {:?}", other),
        })
        .collect();
    assert_eq!(keys, vec!["a", "b", "c", "d"]);
}

#[test]
fn same_props_reseal_identically_up_to_nonce() {
    // Two seals of the same payload differ only through the random nonce:
    // lengths match and both decode to the same props.
    let key = [1u8; 32];
    let id = Uuid::new_v4();
    let payload = props();
    let a = SecureRecord::new(id, &payload, &key).unwrap();
    let b = SecureRecord::new(id, &payload, &key).unwrap();
    assert_eq!(a.sealed_bytes().len(), b.sealed_bytes().len());
    assert_eq!(a.props::<Props>(&key), b.props::<Props>(&key));
}
