//! Match enrichment: counterpart profile, latest message, and unread count.
//!
//! Lookups run concurrently and fail per item. A counterpart whose profile
//! cannot be fetched gets a placeholder; a conversation summary that cannot
//! be fetched degrades to "no message, nothing unread". Neither fails the list.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tracing::{debug, warn};

use crate::{ApiClient, ClientConfig, EnrichedMatch, Match, Message, Profile, SyncError};
use crate::types::UnreadCount;

/// Result of one auxiliary lookup, with the substitute used on failure.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    Fallback { value: T, error: String },
}

impl<T> Lookup<T> {
    /// The value and whether it is a substitute.
    pub fn into_parts(self) -> (T, bool) {
        match self {
            Lookup::Found(value) => (value, false),
            Lookup::Fallback { value, .. } => (value, true),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Lookup::Fallback { .. })
    }
}

/// Conversation data shown next to a match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationSummary {
    pub last_message: Option<Message>,
    pub unread_count: u32,
}

/// Augments raw matches with data from the profile and message endpoints.
pub struct MatchEnricher {
    api: Arc<ApiClient>,
    parallelism: usize,
    placeholder_name: String,
    placeholder_photo: String,
}

impl MatchEnricher {
    pub fn new(api: Arc<ApiClient>, config: &ClientConfig) -> Self {
        Self {
            api,
            parallelism: config.enrichment_parallelism.max(1),
            placeholder_name: config.placeholder_name.clone(),
            placeholder_photo: config.placeholder_photo.clone(),
        }
    }

    /// Enrich `matches` from the point of view of `user_id`.
    ///
    /// The output has one entry per input, in input order.
    #[tracing::instrument(skip(self, matches), fields(count = matches.len()))]
    pub async fn enrich(&self, user_id: i64, matches: Vec<Match>) -> Vec<EnrichedMatch> {
        if matches.is_empty() {
            return Vec::new();
        }

        // One profile lookup per distinct counterpart.
        let mut seen = HashSet::new();
        let counterparts: Vec<i64> = matches
            .iter()
            .map(|m| m.counterpart_of(user_id))
            .filter(|id| seen.insert(*id))
            .collect();

        debug!(
            matches = matches.len(),
            counterparts = counterparts.len(),
            "deduplicated profile lookups"
        );

        let (profiles, summaries) = tokio::join!(
            self.lookup_profiles(&counterparts),
            self.lookup_summaries(user_id, &matches)
        );

        let degraded = matches
            .iter()
            .filter(|m| {
                profiles
                    .get(&m.counterpart_of(user_id))
                    .is_none_or(Lookup::is_fallback)
            })
            .count();
        if degraded > 0 {
            warn!(degraded, "some matches use placeholder profiles");
        }

        matches
            .into_iter()
            .zip(summaries)
            .map(|(record, summary)| {
                let counterpart_id = record.counterpart_of(user_id);
                let (profile, placeholder) = match profiles.get(&counterpart_id) {
                    Some(lookup) => lookup.clone().into_parts(),
                    None => (self.placeholder_profile(), true),
                };
                EnrichedMatch {
                    record,
                    counterpart_id,
                    name: profile.name,
                    last_name: profile.last_name,
                    profile_photo: profile.profile_photo,
                    last_message: summary.last_message,
                    unread_count: summary.unread_count,
                    placeholder,
                }
            })
            .collect()
    }

    async fn lookup_profiles(&self, user_ids: &[i64]) -> HashMap<i64, Lookup<Profile>> {
        stream::iter(user_ids.iter().copied())
            .map(|id| async move { (id, self.lookup_profile(id).await) })
            .buffer_unordered(self.parallelism)
            .collect()
            .await
    }

    /// Summaries in the same order as `matches`.
    async fn lookup_summaries(&self, user_id: i64, matches: &[Match]) -> Vec<ConversationSummary> {
        let match_ids: Vec<i64> = matches.iter().map(|m| m.id).collect();
        stream::iter(match_ids)
            .map(|match_id| self.lookup_summary(match_id, user_id))
            .buffered(self.parallelism)
            .collect()
            .await
    }

    async fn lookup_profile(&self, user_id: i64) -> Lookup<Profile> {
        match self
            .api
            .get_json::<Profile>(&format!("/profiles/user/{user_id}"))
            .await
        {
            Ok(profile) => Lookup::Found(profile),
            Err(e) => {
                warn!(user_id, error = %e, "counterpart profile unavailable, using placeholder");
                Lookup::Fallback {
                    value: self.placeholder_profile(),
                    error: e.to_string(),
                }
            }
        }
    }

    async fn lookup_summary(&self, match_id: i64, user_id: i64) -> ConversationSummary {
        let (last_message, unread_count) = tokio::join!(
            self.latest_message(match_id),
            self.unread_count(match_id, user_id)
        );
        ConversationSummary {
            last_message,
            unread_count,
        }
    }

    async fn latest_message(&self, match_id: i64) -> Option<Message> {
        let result = self
            .api
            .get_json_with_query::<Vec<Message>>(
                &format!("/messages/match/{match_id}"),
                &[("limit", "1".to_string())],
            )
            .await;

        match result {
            Ok(messages) => messages.into_iter().next(),
            Err(SyncError::NotFound(_)) => None,
            Err(e) => {
                warn!(match_id, error = %e, "latest message unavailable");
                None
            }
        }
    }

    async fn unread_count(&self, match_id: i64, user_id: i64) -> u32 {
        let result = self
            .api
            .get_json_with_query::<UnreadCount>(
                "/messages/unread",
                &[
                    ("matchId", match_id.to_string()),
                    ("userId", user_id.to_string()),
                ],
            )
            .await;

        match result {
            Ok(unread) => unread.count.unwrap_or(0),
            Err(SyncError::NotFound(_)) => 0,
            Err(e) => {
                warn!(match_id, error = %e, "unread count unavailable");
                0
            }
        }
    }

    fn placeholder_profile(&self) -> Profile {
        Profile::placeholder(&self.placeholder_name, &self.placeholder_photo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryStore;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn raw_match(id: i64, user1: i64, user2: i64) -> Match {
        Match {
            id,
            user1_id: user1,
            user2_id: user2,
            match_date: None,
            match_state: None,
        }
    }

    fn enricher(uri: &str) -> MatchEnricher {
        let config = ClientConfig::builder().base_url(uri).build().unwrap();
        let api = Arc::new(ApiClient::new(&config, Arc::new(MemoryStore::new())).unwrap());
        MatchEnricher::new(api, &config)
    }

    async fn mount_empty_conversations(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/messages/unread"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 0})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn empty_input_makes_no_calls() {
        let server = MockServer::start().await;
        let out = enricher(&server.uri()).enrich(7, Vec::new()).await;
        assert!(out.is_empty());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn enriches_with_profile_message_and_unread() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/profiles/user/9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Eva",
                "lastName": "Paz",
                "profilePhoto": "https://img/eva.jpg"
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/messages/match/1"))
            .and(query_param("limit", "1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
                "id": 50,
                "match_id": 1,
                "content": "hola",
                "senderUser_id": 9,
                "receiverUser_id": 7,
                "isRead": false
            }])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/messages/unread"))
            .and(query_param("matchId", "1"))
            .and(query_param("userId", "7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 3})))
            .mount(&server)
            .await;

        let out = enricher(&server.uri())
            .enrich(7, vec![raw_match(1, 9, 7)])
            .await;

        assert_eq!(out.len(), 1);
        let enriched = &out[0];
        assert_eq!(enriched.counterpart_id, 9);
        assert_eq!(enriched.name.as_deref(), Some("Eva"));
        assert_eq!(enriched.last_name.as_deref(), Some("Paz"));
        assert_eq!(enriched.profile_photo.as_deref(), Some("https://img/eva.jpg"));
        assert_eq!(enriched.last_message.as_ref().map(|m| m.id), Some(50));
        assert_eq!(enriched.unread_count, 3);
        assert!(!enriched.placeholder);
    }

    #[tokio::test]
    async fn missing_conversation_data_is_not_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/profiles/user/9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Eva"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/messages/match/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/messages/unread"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let out = enricher(&server.uri())
            .enrich(7, vec![raw_match(1, 7, 9)])
            .await;
        assert_eq!(out[0].last_message, None);
        assert_eq!(out[0].unread_count, 0);
    }

    #[tokio::test]
    async fn shared_counterpart_is_fetched_once() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/profiles/user/9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Eva"})))
            .expect(1)
            .mount(&server)
            .await;
        mount_empty_conversations(&server).await;

        let out = enricher(&server.uri())
            .enrich(7, vec![raw_match(1, 7, 9), raw_match(2, 9, 7)])
            .await;

        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|m| m.name.as_deref() == Some("Eva")));
        server.verify().await;
    }

    #[tokio::test]
    async fn summary_failures_degrade_quietly() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/profiles/user/9"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "Eva"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/messages/match/1"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/messages/unread"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let out = enricher(&server.uri())
            .enrich(7, vec![raw_match(1, 7, 9)])
            .await;
        assert_eq!(out[0].name.as_deref(), Some("Eva"));
        assert_eq!(out[0].last_message, None);
        assert_eq!(out[0].unread_count, 0);
        assert!(!out[0].placeholder);
    }

    #[test]
    fn lookup_parts() {
        assert_eq!(Lookup::Found(1).into_parts(), (1, false));
        let fallback = Lookup::Fallback {
            value: 2,
            error: "boom".into(),
        };
        assert!(fallback.is_fallback());
        assert_eq!(fallback.into_parts(), (2, true));
    }
}
