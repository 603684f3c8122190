//! Canonical data model shared by the session, cache, and thread components.
//!
//! Remote payloads are normalized here, once, on ingestion: alternate field
//! spellings are folded into a single field and timestamps are accepted with
//! or without an offset.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::SyncError;

/// Youngest age a preference range may include.
pub const MIN_AGE: u8 = 18;

/// Oldest age a preference range may include.
pub const MAX_AGE: u8 = 99;

/// Upper bound for the search radius, in kilometres.
pub const MAX_DISTANCE_KM: u32 = 500;

/// Role assigned to self-registered accounts.
pub const DEFAULT_ROLE: &str = "CLIENT";

// =============================================================================
// Session and identity
// =============================================================================

/// Identity of the authenticated user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "RawUser")]
pub struct User {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Attributes the server sends that have no canonical field.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    /// "First Last", falling back to the username.
    pub fn display_name(&self) -> Option<String> {
        match (&self.first_name, &self.last_name) {
            (Some(first), Some(last)) => Some(format!("{first} {last}")),
            (Some(first), None) => Some(first.clone()),
            (None, Some(last)) => Some(last.clone()),
            (None, None) => self.username.clone(),
        }
    }
}

/// Wire shape of a user: tolerates both camelCase and lowercase name fields.
#[derive(Deserialize)]
struct RawUser {
    id: i64,
    #[serde(rename = "firstName", default)]
    first_name: Option<String>,
    #[serde(default)]
    firstname: Option<String>,
    #[serde(rename = "lastName", default)]
    last_name: Option<String>,
    #[serde(default)]
    lastname: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(rename = "UserRole", default)]
    user_role: Option<String>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<RawUser> for User {
    fn from(raw: RawUser) -> Self {
        Self {
            id: raw.id,
            first_name: raw.first_name.or(raw.firstname),
            last_name: raw.last_name.or(raw.lastname),
            username: raw.username,
            email: raw.email,
            role: raw.role.or(raw.user_role),
            extra: raw.extra,
        }
    }
}

/// An authenticated session: bearer credential plus identity.
///
/// Both halves are always present; a store holding only one of them is
/// read back as "no session".
#[derive(Clone, PartialEq)]
pub struct Session {
    pub credential: String,
    pub identity: User,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("credential", &"<redacted>")
            .field("identity", &self.identity)
            .finish()
    }
}

/// A successful login: the persisted session plus the rest of the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct LoginOutcome {
    pub session: Session,
    /// Top-level fields other than `token`, `user` and `role`.
    pub extra: Map<String, Value>,
}

/// Response from `POST /auth/login`.
#[derive(Debug, Deserialize)]
pub(crate) struct LoginResponse {
    pub token: String,
    pub user: User,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl LoginResponse {
    /// Fold the payload into a session, taking a top-level role when the
    /// user record carries none.
    pub fn into_outcome(self) -> LoginOutcome {
        let mut identity = self.user;
        if identity.role.is_none() {
            identity.role = self.role;
        }
        LoginOutcome {
            session: Session {
                credential: self.token,
                identity,
            },
            extra: self.extra,
        }
    }
}

/// Signup form. Fields in `extra` are forwarded to the server verbatim.
#[derive(Clone, Serialize)]
pub struct Registration {
    pub firstname: String,
    pub lastname: String,
    pub username: String,
    pub email: String,
    pub password: String,
    #[serde(rename = "UserRole")]
    pub role: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Registration {
    /// A registration with the given credentials and the default role.
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            firstname: String::new(),
            lastname: String::new(),
            username: String::new(),
            email: email.into(),
            password: password.into(),
            role: DEFAULT_ROLE.to_string(),
            extra: Map::new(),
        }
    }

    pub fn names(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.firstname = first.into();
        self.lastname = last.into();
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    /// Attach an additional field to forward as-is.
    pub fn field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("firstname", &self.firstname)
            .field("lastname", &self.lastname)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("role", &self.role)
            .field("extra", &self.extra)
            .finish()
    }
}

/// What the server returns for a successful signup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignupReceipt {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// =============================================================================
// Profile and preferences
// =============================================================================

/// Extended, owner-editable user attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, alias = "user_id", skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, deserialize_with = "string_or_list")]
    pub interests: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relationship_type: Option<String>,
    #[serde(default, alias = "photo")]
    pub profile_photo: Option<String>,
}

impl Profile {
    /// Stand-in used when a counterpart's profile cannot be fetched.
    pub fn placeholder(name: &str, photo: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            profile_photo: Some(photo.to_string()),
            ..Self::default()
        }
    }
}

/// Accepts `["a","b"]`, `"a, b"`, or null.
fn string_or_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<String>),
        Text(String),
    }

    Ok(match Option::<Raw>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Raw::List(items)) => items,
        Some(Raw::Text(text)) => text
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    })
}

/// Gender filter for match search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Gender {
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "MALE",
            Gender::Female => "FEMALE",
            Gender::Other => "OTHER",
        }
    }
}

impl std::fmt::Display for Gender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Gender {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "MALE" => Ok(Gender::Male),
            "FEMALE" => Ok(Gender::Female),
            "OTHER" => Ok(Gender::Other),
            _ => Err(SyncError::Validation(format!(
                "unknown gender '{s}', expected MALE, FEMALE or OTHER"
            ))),
        }
    }
}

/// Per-user search criteria.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub favorite_gender: Option<Gender>,
    #[serde(default = "default_min_age")]
    pub min_age_range: u8,
    #[serde(default = "default_max_age")]
    pub max_age_range: u8,
    #[serde(default)]
    pub max_distance: Option<u32>,
}

fn default_min_age() -> u8 {
    MIN_AGE
}

fn default_max_age() -> u8 {
    MAX_AGE
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            id: None,
            user_id: None,
            favorite_gender: None,
            min_age_range: MIN_AGE,
            max_age_range: MAX_AGE,
            max_distance: None,
        }
    }
}

impl Preferences {
    /// Check the age range and distance bounds.
    pub fn validate(&self) -> Result<(), SyncError> {
        check_age_range(self.min_age_range, self.max_age_range)?;
        if let Some(distance) = self.max_distance {
            check_distance(distance)?;
        }
        Ok(())
    }

    /// Move both age handles at once; rejected moves leave `self` untouched.
    pub fn set_age_range(&mut self, min: u8, max: u8) -> Result<(), SyncError> {
        check_age_range(min, max)?;
        self.min_age_range = min;
        self.max_age_range = max;
        Ok(())
    }

    pub fn set_max_distance(&mut self, km: u32) -> Result<(), SyncError> {
        check_distance(km)?;
        self.max_distance = Some(km);
        Ok(())
    }
}

fn check_age_range(min: u8, max: u8) -> Result<(), SyncError> {
    for age in [min, max] {
        if !(MIN_AGE..=MAX_AGE).contains(&age) {
            return Err(SyncError::Validation(format!(
                "age {age} outside [{MIN_AGE}, {MAX_AGE}]"
            )));
        }
    }
    if min >= max {
        return Err(SyncError::Validation(format!(
            "minimum age {min} must be below maximum age {max}"
        )));
    }
    Ok(())
}

fn check_distance(km: u32) -> Result<(), SyncError> {
    if km == 0 || km > MAX_DISTANCE_KM {
        return Err(SyncError::Validation(format!(
            "max distance {km} km outside [1, {MAX_DISTANCE_KM}]"
        )));
    }
    Ok(())
}

// =============================================================================
// Matches and messages
// =============================================================================

/// A match between two users, as returned by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: i64,
    #[serde(alias = "user1Id")]
    pub user1_id: i64,
    #[serde(alias = "user2Id")]
    pub user2_id: i64,
    #[serde(
        rename = "matchDate",
        default,
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub match_date: Option<DateTime<Utc>>,
    #[serde(rename = "matchState", default, skip_serializing_if = "Option::is_none")]
    pub match_state: Option<String>,
}

impl Match {
    /// The member of the pair that is not `user_id`.
    pub fn counterpart_of(&self, user_id: i64) -> i64 {
        if self.user1_id == user_id {
            self.user2_id
        } else {
            self.user1_id
        }
    }
}

/// A match augmented with counterpart and conversation summary data.
///
/// Only this projection is cached; the derived fields are recomputed on
/// every enrichment pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedMatch {
    #[serde(flatten)]
    pub record: Match,
    pub counterpart_id: i64,
    pub name: Option<String>,
    pub last_name: Option<String>,
    pub profile_photo: Option<String>,
    pub last_message: Option<Message>,
    #[serde(default)]
    pub unread_count: u32,
    /// Set when the counterpart profile could not be fetched.
    #[serde(default)]
    pub placeholder: bool,
}

/// A chat message within a match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    #[serde(alias = "matchId")]
    pub match_id: i64,
    pub content: String,
    #[serde(rename = "senderUser_id", alias = "senderUserId")]
    pub sender_user_id: i64,
    #[serde(rename = "receiverUser_id", alias = "receiverUserId")]
    pub receiver_user_id: i64,
    #[serde(
        default,
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "isRead", alias = "read", default)]
    pub is_read: bool,
}

/// Body of `POST /messages`.
#[derive(Debug, Clone, Serialize)]
pub struct MessageDraft {
    pub match_id: i64,
    pub content: String,
    #[serde(rename = "senderUser_id")]
    pub sender_user_id: i64,
    #[serde(rename = "receiverUser_id")]
    pub receiver_user_id: i64,
}

/// Response from `GET /messages/unread`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct UnreadCount {
    #[serde(default)]
    pub count: Option<u32>,
}

/// Sort most-recent-first; messages without a timestamp sink to the end.
pub fn sort_newest_first(messages: &mut [Message]) {
    messages.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
}

/// Timestamp (de)serialization accepting RFC 3339 and offset-less ISO 8601.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};

    pub fn parse(raw: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Ok(dt.with_timezone(&Utc));
        }
        // Offset-less values are server-local, which we treat as UTC.
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp '{raw}': {e}"))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(dt) => serializer.serialize_some(&dt.to_rfc3339()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<String>::deserialize(deserializer)?
                .map(|raw| super::parse(&raw))
                .transpose()
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn user_normalizes_lowercase_names() {
        let user: User = serde_json::from_value(json!({
            "id": 7,
            "firstname": "Ana",
            "lastname": "Ruiz",
            "email": "ana@example.com",
            "UserRole": "CLIENT",
            "bio": "hola"
        }))
        .unwrap();

        assert_eq!(user.first_name.as_deref(), Some("Ana"));
        assert_eq!(user.last_name.as_deref(), Some("Ruiz"));
        assert_eq!(user.role.as_deref(), Some("CLIENT"));
        assert_eq!(user.extra.get("bio"), Some(&json!("hola")));
    }

    #[test]
    fn user_prefers_camel_case_when_both_present() {
        let user: User = serde_json::from_value(json!({
            "id": 1,
            "firstName": "Canonical",
            "firstname": "legacy"
        }))
        .unwrap();
        assert_eq!(user.first_name.as_deref(), Some("Canonical"));
    }

    #[test]
    fn user_survives_cache_roundtrip() {
        let user: User = serde_json::from_value(json!({
            "id": 3,
            "firstname": "Luz",
            "location": "Quito"
        }))
        .unwrap();
        let stored = serde_json::to_string(&user).unwrap();
        assert!(stored.contains("\"firstName\":\"Luz\""));
        let back: User = serde_json::from_str(&stored).unwrap();
        assert_eq!(back, user);
    }

    #[test]
    fn login_response_takes_top_level_role() {
        let response: LoginResponse = serde_json::from_value(json!({
            "token": "t1",
            "user": {"id": 7},
            "role": "ADMIN",
            "expiresIn": 3600
        }))
        .unwrap();
        let outcome = response.into_outcome();
        assert_eq!(outcome.session.credential, "t1");
        assert_eq!(outcome.session.identity.role.as_deref(), Some("ADMIN"));
        assert_eq!(outcome.extra.get("expiresIn"), Some(&json!(3600)));
        assert!(!outcome.extra.contains_key("token"));
    }

    #[test]
    fn session_debug_hides_credential() {
        let session = Session {
            credential: "secret-token".into(),
            identity: serde_json::from_value(json!({"id": 1})).unwrap(),
        };
        assert!(!format!("{session:?}").contains("secret-token"));
    }

    #[test]
    fn registration_wire_shape() {
        let registration = Registration::new("a@b.com", "pw")
            .names("Ana", "Ruiz")
            .username("ana")
            .field("birthDate", "2000-01-01");
        let value = serde_json::to_value(&registration).unwrap();

        assert_eq!(value["UserRole"], json!("CLIENT"));
        assert_eq!(value["firstname"], json!("Ana"));
        assert_eq!(value["birthDate"], json!("2000-01-01"));
        assert!(!format!("{registration:?}").contains("\"pw\""));
    }

    #[test]
    fn profile_interests_from_text() {
        let profile: Profile = serde_json::from_value(json!({
            "userId": 9,
            "name": "Leo",
            "interests": "music, hiking ,"
        }))
        .unwrap();
        assert_eq!(profile.interests, vec!["music", "hiking"]);
        assert_eq!(profile.user_id, Some(9));
    }

    #[test]
    fn preferences_defaults_and_validation() {
        let prefs: Preferences =
            serde_json::from_value(json!({"favoriteGender": "FEMALE"})).unwrap();
        assert_eq!(prefs.min_age_range, MIN_AGE);
        assert_eq!(prefs.max_age_range, MAX_AGE);
        assert_eq!(prefs.favorite_gender, Some(Gender::Female));
        assert!(prefs.validate().is_ok());
    }

    #[test]
    fn age_range_slider_rejects_inversions() {
        let mut prefs = Preferences::default();
        assert!(prefs.set_age_range(30, 30).is_err());
        assert!(prefs.set_age_range(40, 25).is_err());
        assert!(prefs.set_age_range(17, 25).is_err());
        assert!(prefs.set_age_range(25, 100).is_err());
        assert_eq!((prefs.min_age_range, prefs.max_age_range), (MIN_AGE, MAX_AGE));

        prefs.set_age_range(25, 40).unwrap();
        assert_eq!((prefs.min_age_range, prefs.max_age_range), (25, 40));
    }

    #[test]
    fn distance_bounds() {
        let mut prefs = Preferences::default();
        assert!(prefs.set_max_distance(0).is_err());
        assert!(prefs.set_max_distance(MAX_DISTANCE_KM + 1).is_err());
        prefs.set_max_distance(MAX_DISTANCE_KM).unwrap();
        assert_eq!(prefs.max_distance, Some(MAX_DISTANCE_KM));
    }

    #[test]
    fn gender_parses_case_insensitively() {
        assert_eq!("female".parse::<Gender>().unwrap(), Gender::Female);
        assert!(matches!(
            "robot".parse::<Gender>(),
            Err(SyncError::Validation(_))
        ));
    }

    #[test]
    fn match_counterpart() {
        let m = Match {
            id: 1,
            user1_id: 7,
            user2_id: 9,
            match_date: None,
            match_state: None,
        };
        assert_eq!(m.counterpart_of(7), 9);
        assert_eq!(m.counterpart_of(9), 7);
    }

    #[test]
    fn message_accepts_offsetless_timestamps() {
        let message: Message = serde_json::from_value(json!({
            "id": 5,
            "match_id": 1,
            "content": "hola",
            "senderUser_id": 7,
            "receiverUser_id": 9,
            "timestamp": "2024-03-01T10:15:30.123",
            "isRead": false
        }))
        .unwrap();
        let ts = message.timestamp.unwrap();
        assert_eq!(ts.to_rfc3339(), "2024-03-01T10:15:30.123+00:00");
    }

    #[test]
    fn enriched_match_flattens_record() {
        let enriched = EnrichedMatch {
            record: Match {
                id: 4,
                user1_id: 7,
                user2_id: 8,
                match_date: None,
                match_state: Some("ACTIVE".into()),
            },
            counterpart_id: 8,
            name: Some("Eva".into()),
            last_name: None,
            profile_photo: None,
            last_message: None,
            unread_count: 2,
            placeholder: false,
        };
        let value = serde_json::to_value(&enriched).unwrap();
        assert_eq!(value["id"], json!(4));
        assert_eq!(value["matchState"], json!("ACTIVE"));
        assert_eq!(value["unreadCount"], json!(2));

        let back: EnrichedMatch = serde_json::from_value(value).unwrap();
        assert_eq!(back, enriched);
    }

    #[test]
    fn newest_first_ordering() {
        let at = |s: &str| Some(timestamp::parse(s).unwrap());
        let mk = |id, ts| Message {
            id,
            match_id: 1,
            content: String::new(),
            sender_user_id: 1,
            receiver_user_id: 2,
            timestamp: ts,
            is_read: true,
        };
        let mut messages = vec![
            mk(1, at("2024-01-01T00:00:00Z")),
            mk(2, None),
            mk(3, at("2024-01-02T00:00:00Z")),
        ];
        sort_newest_first(&mut messages);
        let ids: Vec<i64> = messages.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![3, 1, 2]);
    }
}
