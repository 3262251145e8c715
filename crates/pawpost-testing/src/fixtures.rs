//! Test data builders and fixtures.

use base64::{engine::general_purpose::URL_SAFE, Engine};
use chrono::{TimeZone, Utc};
use pawpost_core::models::{DogLinks, DogRecord, EventKind, OwnerId, Subscription, SubscriptionId};
use pawpost_delivery::SecretCipher;
use rand::Rng;

/// Fixed 32-byte key used by every test cipher.
pub const TEST_KEY: &[u8; 32] = b"pawpost-test-key-0123456789abcde";

/// Returns a cipher keyed with [`TEST_KEY`].
pub fn test_cipher() -> SecretCipher {
    SecretCipher::new(TEST_KEY).expect("test key is 32 bytes")
}

/// Returns a dog record with stable field values.
pub fn sample_dog(id: i32) -> DogRecord {
    DogRecord {
        id,
        name: "Fido".to_string(),
        description: "Good boy, loves fetch".to_string(),
        birth_date: Utc.with_ymd_and_hms(2021, 3, 14, 0, 0, 0).single().unwrap_or_else(Utc::now),
        breed: "Labrador".to_string(),
        is_neutered: true,
        shelter_id: 7,
        image_url: format!("https://images.example.com/dogs/{id}.jpg"),
        adoption_fee: 150,
        is_adopted: false,
        friendly_with: "cats, children".to_string(),
        gender: "male".to_string(),
        links: DogLinks {
            shelter_link: "/shelters/7".to_string(),
            self_link: format!("/dogs/{id}"),
        },
    }
}

/// Flips one byte of an encrypted secret so authentication fails on decrypt.
///
/// The result is still valid base64 of the original length.
pub fn corrupt_ciphertext(encoded: &str) -> String {
    let mut raw = URL_SAFE.decode(encoded).expect("ciphertext is valid base64");
    let last = raw.len() - 1;
    raw[last] ^= 0xff;
    URL_SAFE.encode(raw)
}

/// Builder for test subscriptions.
///
/// Secrets are encrypted with [`test_cipher`] at build time.
pub struct SubscriptionBuilder {
    id: Option<i32>,
    endpoint_url: String,
    secret: String,
    event_kinds: Vec<EventKind>,
    owner_id: Option<i32>,
    corrupt: bool,
}

impl SubscriptionBuilder {
    /// Creates a builder subscribed to `new_dog_added` at `endpoint_url`.
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            id: None,
            endpoint_url: endpoint_url.into(),
            secret: "correct-horse-battery".to_string(),
            event_kinds: vec![EventKind::NewDogAdded],
            owner_id: None,
            corrupt: false,
        }
    }

    /// Sets the subscription id.
    #[must_use]
    pub fn id(mut self, id: i32) -> Self {
        self.id = Some(id);
        self
    }

    /// Sets the plaintext shared secret.
    #[must_use]
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = secret.into();
        self
    }

    /// Sets the subscribed event kinds.
    #[must_use]
    pub fn event_kinds(mut self, kinds: Vec<EventKind>) -> Self {
        self.event_kinds = kinds;
        self
    }

    /// Sets the owning user.
    #[must_use]
    pub fn owner(mut self, owner_id: i32) -> Self {
        self.owner_id = Some(owner_id);
        self
    }

    /// Stores a secret that fails to decrypt.
    #[must_use]
    pub fn corrupted_secret(mut self) -> Self {
        self.corrupt = true;
        self
    }

    /// Builds the subscription.
    pub fn build(self) -> Subscription {
        let mut rng = rand::rng();
        let encrypted = test_cipher().encrypt(&self.secret).expect("test encryption succeeds");
        let encrypted_secret =
            if self.corrupt { corrupt_ciphertext(&encrypted) } else { encrypted };

        Subscription {
            id: SubscriptionId(self.id.unwrap_or_else(|| rng.random_range(1..i32::MAX))),
            endpoint_url: self.endpoint_url,
            encrypted_secret,
            event_kinds: self.event_kinds,
            owner_id: OwnerId(self.owner_id.unwrap_or_else(|| rng.random_range(1..10_000))),
        }
    }
}
