//! Core domain models and strongly-typed identifiers.
//!
//! Defines domain events, subscriptions, delivery attempts, and newtype ID
//! wrappers for compile-time type safety. Includes database serialization
//! traits for the identifiers persisted by the subscription store.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CoreError, Result};

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Minimum length of a subscriber's plaintext shared secret.
pub const MIN_SECRET_LENGTH: usize = 12;

/// Strongly-typed event identifier.
///
/// Wraps a UUID so every log line and observability event emitted for one
/// dispatch can be correlated.
///
/// # Example
///
/// ```
/// use pawpost_core::models::EventId;
/// let event_id = EventId::new();
/// println!("Dispatching event: {}", event_id);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Strongly-typed subscription identifier.
///
/// Backed by the `SERIAL` primary key of the subscription table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub i32);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for SubscriptionId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl sqlx::Type<PgDb> for SubscriptionId {
    fn type_info() -> PgTypeInfo {
        <i32 as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for SubscriptionId {
    fn decode(value: PgValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
        let id = <i32 as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(id))
    }
}

impl sqlx::Encode<'_, PgDb> for SubscriptionId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <i32 as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Identifier of the user that registered a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerId(pub i32);

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i32> for OwnerId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl sqlx::Type<PgDb> for OwnerId {
    fn type_info() -> PgTypeInfo {
        <i32 as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for OwnerId {
    fn decode(value: PgValueRef<'r>) -> std::result::Result<Self, BoxDynError> {
        let id = <i32 as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(id))
    }
}

impl sqlx::Encode<'_, PgDb> for OwnerId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <i32 as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Category of domain occurrence subscribers can register interest in.
///
/// Stored as its wire name in the subscription table. Each kind also names
/// the JSON key its payload is delivered under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A new adoptable dog record was created.
    NewDogAdded,
}

impl EventKind {
    /// Every kind the system knows how to deliver.
    pub const ALL: [Self; 1] = [Self::NewDogAdded];

    /// Returns the wire name used in storage and subscription requests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewDogAdded => "new_dog_added",
        }
    }

    /// Returns the envelope key the event payload is delivered under.
    pub fn envelope_key(&self) -> &'static str {
        match self {
            Self::NewDogAdded => "new_dog",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new_dog_added" => Ok(Self::NewDogAdded),
            other => Err(CoreError::InvalidInput(format!("invalid webhook action: {other}"))),
        }
    }
}

/// Domain event handed to the dispatcher by a producing use case.
///
/// Immutable once created. The payload is an opaque JSON value so the
/// dispatcher never needs to know the shape of the record it delivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    kind: EventKind,
    payload: serde_json::Value,
    occurred_at: DateTime<Utc>,
}

impl Event {
    /// Creates an event from an already serialized payload.
    pub fn new(kind: EventKind, payload: serde_json::Value) -> Self {
        Self { id: EventId::new(), kind, payload, occurred_at: Utc::now() }
    }

    /// Creates an event by serializing a domain record.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` if the record cannot be represented
    /// as JSON.
    pub fn from_record<T: Serialize>(kind: EventKind, record: &T) -> Result<Self> {
        let payload = serde_json::to_value(record)?;
        Ok(Self::new(kind, payload))
    }

    /// Creates a `new_dog_added` event for a freshly created dog record.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` if the record cannot be serialized.
    pub fn new_dog_added(dog: &DogRecord) -> Result<Self> {
        Self::from_record(EventKind::NewDogAdded, dog)
    }

    /// Unique identifier of this event.
    pub fn id(&self) -> EventId {
        self.id
    }

    /// Kind used to select interested subscribers.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Event payload delivered to subscribers.
    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    /// When the producing use case created the event.
    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// Dog record as exposed by the public API and delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DogRecord {
    /// Database identifier of the dog.
    pub id: i32,
    /// Display name.
    pub name: String,
    /// Free-text description.
    pub description: String,
    /// Date of birth.
    pub birth_date: DateTime<Utc>,
    /// Breed name.
    pub breed: String,
    /// Whether the dog is neutered.
    pub is_neutered: bool,
    /// Shelter housing the dog.
    pub shelter_id: i32,
    /// Public image URL.
    pub image_url: String,
    /// Adoption fee in whole currency units.
    pub adoption_fee: i32,
    /// Whether the dog has already been adopted.
    pub is_adopted: bool,
    /// Animals or people the dog gets along with.
    pub friendly_with: String,
    /// Gender label.
    pub gender: String,
    /// Hypermedia links for the record.
    pub links: DogLinks,
}

/// Hypermedia links attached to a dog record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DogLinks {
    /// Link to the owning shelter.
    pub shelter_link: String,
    /// Link to the dog record itself.
    pub self_link: String,
}

/// A subscriber's registration of interest in one or more event kinds.
///
/// Read-only from the dispatcher's perspective. The secret is stored
/// encrypted and only decrypted immediately before delivery.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Unique subscription identifier.
    pub id: SubscriptionId,
    /// HTTPS endpoint that receives deliveries.
    pub endpoint_url: String,
    /// Encrypted shared secret.
    pub encrypted_secret: String,
    /// Event kinds this subscription is interested in.
    pub event_kinds: Vec<EventKind>,
    /// User that owns the subscription.
    pub owner_id: OwnerId,
}

impl Subscription {
    /// Returns whether this subscription wants events of `kind`.
    pub fn is_subscribed_to(&self, kind: EventKind) -> bool {
        self.event_kinds.contains(&kind)
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("endpoint_url", &self.endpoint_url)
            .field("encrypted_secret", &format_args!("<{} bytes>", self.encrypted_secret.len()))
            .field("event_kinds", &self.event_kinds)
            .field("owner_id", &self.owner_id)
            .finish()
    }
}

/// Input for registering a new subscription.
///
/// The CRUD layer encrypts the plaintext secret before building this value.
#[derive(Clone, PartialEq, Eq)]
pub struct NewSubscription {
    /// HTTPS endpoint that receives deliveries.
    pub endpoint_url: String,
    /// Encrypted shared secret.
    pub encrypted_secret: String,
    /// Event kinds this subscription is interested in.
    pub event_kinds: Vec<EventKind>,
    /// User that owns the subscription.
    pub owner_id: OwnerId,
}

impl NewSubscription {
    /// Validates the subscription before it is persisted.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` if the endpoint is not an absolute
    /// HTTPS URL, the secret is empty, or no event kinds are given.
    pub fn validate(&self) -> Result<()> {
        validate_endpoint_url(&self.endpoint_url)?;

        if self.encrypted_secret.is_empty() {
            return Err(CoreError::InvalidInput("encrypted secret must not be empty".to_string()));
        }

        if self.event_kinds.is_empty() {
            return Err(CoreError::InvalidInput(
                "at least one webhook action is required".to_string(),
            ));
        }

        Ok(())
    }
}

impl fmt::Debug for NewSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewSubscription")
            .field("endpoint_url", &self.endpoint_url)
            .field("encrypted_secret", &format_args!("<{} bytes>", self.encrypted_secret.len()))
            .field("event_kinds", &self.event_kinds)
            .field("owner_id", &self.owner_id)
            .finish()
    }
}

/// Partial change to an existing subscription.
///
/// Fields left as `None` keep their stored value. As with
/// [`NewSubscription`], the secret is already encrypted.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    /// New HTTPS endpoint.
    pub endpoint_url: Option<String>,
    /// New encrypted shared secret.
    pub encrypted_secret: Option<String>,
    /// New set of event kinds.
    pub event_kinds: Option<Vec<EventKind>>,
}

impl SubscriptionUpdate {
    /// Validates the fields that are being changed.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidInput` if nothing would change, or if a
    /// given field breaks the rules [`NewSubscription::validate`] enforces.
    pub fn validate(&self) -> Result<()> {
        if self.endpoint_url.is_none()
            && self.encrypted_secret.is_none()
            && self.event_kinds.is_none()
        {
            return Err(CoreError::InvalidInput("update changes no field".to_string()));
        }

        if let Some(endpoint_url) = &self.endpoint_url {
            validate_endpoint_url(endpoint_url)?;
        }

        if self.encrypted_secret.as_deref().is_some_and(str::is_empty) {
            return Err(CoreError::InvalidInput("encrypted secret must not be empty".to_string()));
        }

        if self.event_kinds.as_ref().is_some_and(Vec::is_empty) {
            return Err(CoreError::InvalidInput(
                "at least one webhook action is required".to_string(),
            ));
        }

        Ok(())
    }
}

impl fmt::Debug for SubscriptionUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionUpdate")
            .field("endpoint_url", &self.endpoint_url)
            .field(
                "encrypted_secret",
                &self.encrypted_secret.as_ref().map(|s| format!("<{} bytes>", s.len())),
            )
            .field("event_kinds", &self.event_kinds)
            .finish()
    }
}

fn validate_endpoint_url(endpoint_url: &str) -> Result<()> {
    let url = url::Url::parse(endpoint_url)
        .map_err(|_| CoreError::InvalidInput("invalid endpoint url".to_string()))?;

    if url.scheme() != "https" {
        return Err(CoreError::InvalidInput("endpoint url must be https".to_string()));
    }
    Ok(())
}

/// Checks a plaintext shared secret before it is encrypted and stored.
///
/// # Errors
///
/// Returns `CoreError::InvalidInput` if the secret is shorter than
/// [`MIN_SECRET_LENGTH`] characters.
pub fn validate_plaintext_secret(secret: &str) -> Result<()> {
    if secret.chars().count() < MIN_SECRET_LENGTH {
        return Err(CoreError::InvalidInput(format!(
            "secret must be minimum {MIN_SECRET_LENGTH} characters long"
        )));
    }
    Ok(())
}

/// Classification of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Endpoint answered with a 2xx or 3xx status.
    Success,
    /// Any other result; eligible for retry.
    TransientFailure,
}

impl AttemptOutcome {
    /// Returns true for a successful attempt.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for AttemptOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::TransientFailure => write!(f, "transient_failure"),
        }
    }
}

/// Record of one HTTP delivery attempt to one subscriber.
///
/// Transient: drives retry decisions and observability only, never
/// persisted and never carries the decrypted secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// Event being delivered.
    pub event_id: EventId,
    /// Subscription the attempt targeted.
    pub subscription_id: SubscriptionId,
    /// 1-based attempt number.
    pub attempt_number: u32,
    /// Attempt classification.
    pub outcome: AttemptOutcome,
    /// HTTP status if the endpoint responded.
    pub response_status: Option<u16>,
    /// Error description for failed attempts.
    pub error_message: Option<String>,
    /// Wall time the attempt took.
    pub duration_ms: u64,
    /// When the attempt finished.
    pub attempted_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn sample_dog() -> DogRecord {
        DogRecord {
            id: 7,
            name: "Bamse".to_string(),
            description: "Calm and cuddly".to_string(),
            birth_date: Utc.with_ymd_and_hms(2021, 4, 1, 0, 0, 0).unwrap(),
            breed: "Labrador".to_string(),
            is_neutered: true,
            shelter_id: 2,
            image_url: "https://images.example.com/dogs/7.jpg".to_string(),
            adoption_fee: 1500,
            is_adopted: false,
            friendly_with: "children".to_string(),
            gender: "male".to_string(),
            links: DogLinks {
                shelter_link: "/shelters/2".to_string(),
                self_link: "/dogs/7".to_string(),
            },
        }
    }

    fn new_subscription(url: &str) -> NewSubscription {
        NewSubscription {
            endpoint_url: url.to_string(),
            encrypted_secret: "c2VjcmV0".to_string(),
            event_kinds: vec![EventKind::NewDogAdded],
            owner_id: OwnerId(1),
        }
    }

    #[test]
    fn event_kind_wire_names() {
        assert_eq!(EventKind::NewDogAdded.to_string(), "new_dog_added");
        assert_eq!(EventKind::NewDogAdded.envelope_key(), "new_dog");
        assert_eq!("new_dog_added".parse::<EventKind>().unwrap(), EventKind::NewDogAdded);
        assert!("dog_adopted".parse::<EventKind>().is_err());

        let json = serde_json::to_string(&EventKind::NewDogAdded).unwrap();
        assert_eq!(json, "\"new_dog_added\"");
    }

    #[test]
    fn new_dog_event_carries_record_fields() {
        let dog = sample_dog();
        let event = Event::new_dog_added(&dog).unwrap();

        assert_eq!(event.kind(), EventKind::NewDogAdded);
        assert_eq!(event.payload()["id"], 7);
        assert_eq!(event.payload()["name"], "Bamse");
        assert_eq!(event.payload()["links"]["self_link"], "/dogs/7");
        assert_eq!(event.payload()["birth_date"], "2021-04-01T00:00:00Z");
    }

    #[test]
    fn events_get_distinct_ids() {
        let payload = serde_json::json!({"id": 1});
        let a = Event::new(EventKind::NewDogAdded, payload.clone());
        let b = Event::new(EventKind::NewDogAdded, payload);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn subscription_validation_requires_https() {
        assert!(new_subscription("https://hooks.example.com/dogs").validate().is_ok());

        let err = new_subscription("http://hooks.example.com/dogs").validate().unwrap_err();
        assert!(err.to_string().contains("must be https"));

        let err = new_subscription("not a url").validate().unwrap_err();
        assert!(err.to_string().contains("invalid endpoint url"));
    }

    #[test]
    fn subscription_validation_requires_kinds_and_secret() {
        let mut sub = new_subscription("https://hooks.example.com/dogs");
        sub.event_kinds.clear();
        assert!(sub.validate().is_err());

        let mut sub = new_subscription("https://hooks.example.com/dogs");
        sub.encrypted_secret.clear();
        assert!(sub.validate().is_err());
    }

    #[test]
    fn update_must_change_something() {
        let err = SubscriptionUpdate::default().validate().unwrap_err();
        assert!(err.to_string().contains("changes no field"));

        let update = SubscriptionUpdate {
            event_kinds: Some(vec![EventKind::NewDogAdded]),
            ..SubscriptionUpdate::default()
        };
        assert!(update.validate().is_ok());
    }

    #[test]
    fn update_checks_only_given_fields() {
        let plain_http = SubscriptionUpdate {
            endpoint_url: Some("http://hooks.example.com/dogs".to_string()),
            ..SubscriptionUpdate::default()
        };
        assert!(plain_http.validate().unwrap_err().to_string().contains("must be https"));

        let no_kinds =
            SubscriptionUpdate { event_kinds: Some(Vec::new()), ..SubscriptionUpdate::default() };
        assert!(no_kinds.validate().is_err());

        let empty_secret = SubscriptionUpdate {
            encrypted_secret: Some(String::new()),
            ..SubscriptionUpdate::default()
        };
        assert!(empty_secret.validate().is_err());

        let new_secret = SubscriptionUpdate {
            encrypted_secret: Some("bmV3LXNlY3JldA==".to_string()),
            ..SubscriptionUpdate::default()
        };
        assert!(new_secret.validate().is_ok());
        assert!(!format!("{new_secret:?}").contains("bmV3"));
    }

    #[test]
    fn plaintext_secret_minimum_length() {
        assert!(validate_plaintext_secret("short").is_err());
        assert!(validate_plaintext_secret("exactly-12ch").is_ok());
        assert!(validate_plaintext_secret("a much longer shared secret").is_ok());
    }

    #[test]
    fn subscription_debug_hides_ciphertext() {
        let sub = Subscription {
            id: SubscriptionId(3),
            endpoint_url: "https://hooks.example.com".to_string(),
            encrypted_secret: "ZW5jcnlwdGVkLXNlY3JldA==".to_string(),
            event_kinds: vec![EventKind::NewDogAdded],
            owner_id: OwnerId(9),
        };

        let debug = format!("{sub:?}");
        assert!(!debug.contains("ZW5jcnlwdGVkLXNlY3JldA=="));
        assert!(debug.contains("<24 bytes>"));
        assert!(sub.is_subscribed_to(EventKind::NewDogAdded));
    }
}
