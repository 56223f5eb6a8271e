use super::*;
use rand_core::OsRng;

#[derive(Serialize, Deserialize)]
struct Message {
    content: String,
}

impl Message {
    fn digest(&self) -> Digest {
        Digest::hash(self.content.as_ref())
    }
}

pub fn keys() -> Vec<(PublicKey, KeyPair)> {
    (0..4)
        .map(|_| KeyPair::generate_keypair(&mut OsRng))
        .collect()
}

#[test]
fn verify_valid_signature() {
    let (public_key, keypair) = keys().pop().unwrap();

    let message = Message {
        content: "Hello, world!".to_string(),
    };
    let signature = Signature::new(&message.digest(), &keypair);

    assert!(signature.verify(&message.digest(), &public_key).is_ok());
}

#[test]
fn verify_invalid_signature() {
    let (public_key, keypair) = keys().pop().unwrap();

    let message = Message {
        content: "Hello, world!".to_string(),
    };
    let signature = Signature::new(&message.digest(), &keypair);

    let bad_message = Message {
        content: "Bad message!".to_string(),
    };
    assert!(signature
        .verify(&bad_message.digest(), &public_key)
        .is_err());
}

#[test]
fn verify_valid_batch() {
    let message = Message {
        content: "Hello, world!".to_string(),
    };
    let mut keys = keys();
    let signatures: Vec<_> = (0..3)
        .map(|_| {
            let (public_key, secret_key) = keys.pop().unwrap();
            (public_key, Signature::new(&message.digest(), &secret_key))
        })
        .collect();

    assert!(Signature::verify_batch(&message.digest(), &signatures).is_ok());
}

#[test]
fn verify_invalid_batch() {
    let message = Message {
        content: "Hello, world!".to_string(),
    };
    let mut keys = keys();
    let mut signatures: Vec<_> = (0..2)
        .map(|_| {
            let (public_key, secret_key) = keys.pop().unwrap();
            (public_key, Signature::new(&message.digest(), &secret_key))
        })
        .collect();

    let (public_key, _) = keys.pop().unwrap();
    signatures.push((public_key, Signature::default()));

    assert!(Signature::verify_batch(&message.digest(), &signatures).is_err());
}

#[test]
fn public_key_base64_round_trips() {
    let (public_key, _) = keys().pop().unwrap();
    let encoded = public_key.encode_base64();
    let decoded = PublicKey::decode_base64(&encoded).unwrap();
    assert_eq!(public_key, decoded);
}
