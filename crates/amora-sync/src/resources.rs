//! Profile, preferences, and matches on top of the resource cache.
//!
//! Every fetch requires a complete session. A missing session fails with
//! [`SyncError::Auth`] and is never masked by cached data. Slots are addressed
//! by the requested user id, so one user's cache never answers for another.

use std::sync::Arc;

use tracing::{debug, info};

use crate::cache::{CacheSlot, ResourceKind};
use crate::{
    ApiClient, EnrichedMatch, Match, MatchEnricher, Preferences, Profile, Resolved,
    ResourceCache, Revalidation, SessionManager, SyncError,
};


/// Cache-backed access to the user's own resources.
pub struct Resources {
    api: Arc<ApiClient>,
    sessions: Arc<SessionManager>,
    cache: Arc<ResourceCache>,
    enricher: MatchEnricher,
}

impl Resources {
    pub fn new(
        api: Arc<ApiClient>,
        sessions: Arc<SessionManager>,
        cache: Arc<ResourceCache>,
        enricher: MatchEnricher,
    ) -> Self {
        Self {
            api,
            sessions,
            cache,
            enricher,
        }
    }

    // -------------------------------------------------------------------------
    // Profile
    // -------------------------------------------------------------------------

    /// Cached profile now, fresh profile on settle.
    pub async fn profile(&self, user_id: i64) -> Revalidation<'_, Profile> {
        self.cache
            .load(profile_slot(user_id), self.fetch_profile(user_id))
            .await
    }

    pub async fn refresh_profile(&self, user_id: i64) -> Result<Resolved<Profile>, SyncError> {
        self.cache
            .refresh(profile_slot(user_id), self.fetch_profile(user_id))
            .await
    }

    async fn fetch_profile(&self, user_id: i64) -> Result<Profile, SyncError> {
        self.sessions.require().await?;
        self.api
            .get_json(&format!("/profiles/user/{user_id}"))
            .await
    }

    // -------------------------------------------------------------------------
    // Preferences
    // -------------------------------------------------------------------------

    /// Cached preferences now, fresh preferences on settle.
    pub async fn preferences(&self, user_id: i64) -> Revalidation<'_, Preferences> {
        self.cache
            .load(preferences_slot(user_id), self.fetch_preferences(user_id))
            .await
    }

    pub async fn refresh_preferences(
        &self,
        user_id: i64,
    ) -> Result<Resolved<Preferences>, SyncError> {
        self.cache
            .refresh(preferences_slot(user_id), self.fetch_preferences(user_id))
            .await
    }

    /// Save preferences remotely and cache what the server returns.
    ///
    /// The cached value is the server's response, which may differ from
    /// `preferences` if the server normalizes fields.
    #[tracing::instrument(skip(self, preferences))]
    pub async fn update_preferences(
        &self,
        user_id: i64,
        preferences: &Preferences,
    ) -> Result<Preferences, SyncError> {
        preferences.validate()?;
        self.sessions.require().await?;

        let confirmed = self
            .cache
            .write_through(
                preferences_slot(user_id),
                self.api
                    .put_json::<_, Preferences>(&format!("/preferences/{user_id}"), preferences),
            )
            .await?;
        info!("preferences updated");
        Ok(confirmed)
    }

    async fn fetch_preferences(&self, user_id: i64) -> Result<Preferences, SyncError> {
        self.sessions.require().await?;
        self.api
            .get_json(&format!("/preferences/user/{user_id}"))
            .await
    }

    // -------------------------------------------------------------------------
    // Matches
    // -------------------------------------------------------------------------

    /// Cached enriched matches now, a fresh enrichment pass on settle.
    pub async fn matches(&self, user_id: i64) -> Revalidation<'_, Vec<EnrichedMatch>> {
        self.cache
            .load(matches_slot(user_id), self.fetch_matches(user_id))
            .await
    }

    pub async fn refresh_matches(
        &self,
        user_id: i64,
    ) -> Result<Resolved<Vec<EnrichedMatch>>, SyncError> {
        self.cache
            .refresh(matches_slot(user_id), self.fetch_matches(user_id))
            .await
    }

    /// A single match record. Not cached.
    pub async fn match_details(&self, match_id: i64) -> Result<Match, SyncError> {
        self.sessions.require().await?;
        self.api.get_json(&format!("/matches/{match_id}")).await
    }

    async fn fetch_matches(&self, user_id: i64) -> Result<Vec<EnrichedMatch>, SyncError> {
        self.sessions.require().await?;
        let raw: Vec<Match> = self
            .api
            .get_json(&format!("/matches/user/{user_id}"))
            .await?;
        debug!(count = raw.len(), "fetched matches");
        Ok(self.enricher.enrich(user_id, raw).await)
    }
}

fn profile_slot(user_id: i64) -> CacheSlot {
    CacheSlot::resource(ResourceKind::Profile, user_id)
}

fn preferences_slot(user_id: i64) -> CacheSlot {
    CacheSlot::resource(ResourceKind::Preferences, user_id)
}

fn matches_slot(user_id: i64) -> CacheSlot {
    CacheSlot::resource(ResourceKind::Matches, user_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::keys;
    use crate::{ClientConfig, KeyValueStore, MemoryStore};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn resources(uri: &str, logged_in: bool) -> (Arc<MemoryStore>, Resources) {
        let store = Arc::new(MemoryStore::new());
        if logged_in {
            store.set(keys::TOKEN, "t1").await.unwrap();
            store.set(keys::USER, r#"{"id":7}"#).await.unwrap();
        }

        let config = ClientConfig::builder().base_url(uri).build().unwrap();
        let api = Arc::new(ApiClient::new(&config, store.clone()).unwrap());
        let sessions = Arc::new(SessionManager::new(api.clone(), store.clone()));
        let cache = Arc::new(ResourceCache::new(store.clone()));
        let enricher = MatchEnricher::new(api.clone(), &config);
        (store, Resources::new(api, sessions, cache, enricher))
    }

    #[tokio::test]
    async fn fetch_without_session_is_auth_error() {
        let server = MockServer::start().await;
        let (store, resources) = resources(&server.uri(), false).await;
        store
            .set(keys::PROFILE, r#"{"userId":7,"value":{"name":"cached"}}"#)
            .await
            .unwrap();

        let load = resources.profile(7).await;
        assert!(load.cached().is_some());
        assert!(matches!(load.settle().await, Err(SyncError::Auth(_))));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn profile_refresh_overwrites_slot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/profiles/user/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "Ana",
                "bio": "hola",
                "interests": "hiking, chess"
            })))
            .mount(&server)
            .await;

        let (_, resources) = resources(&server.uri(), true).await;
        let resolved = resources.refresh_profile(7).await.unwrap();
        assert!(resolved.is_fresh());
        assert_eq!(resolved.value.interests, vec!["hiking", "chess"]);

        let cached = resources
            .cache
            .read::<Profile>(profile_slot(7))
            .await
            .unwrap();
        assert_eq!(cached.name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn invalid_preferences_never_reach_the_network() {
        let server = MockServer::start().await;
        let (_, resources) = resources(&server.uri(), true).await;

        let mut prefs = Preferences::default();
        prefs.min_age_range = 40;
        prefs.max_age_range = 30;

        assert!(matches!(
            resources.update_preferences(7, &prefs).await,
            Err(SyncError::Validation(_))
        ));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn matches_are_enriched_before_caching() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/matches/user/7"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"id": 1, "user1_id": 7, "user2_id": 9, "matchState": "ACTIVE"}
            ])))
            .mount(&server)
            .await;
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
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 2})))
            .mount(&server)
            .await;

        let (_, resources) = resources(&server.uri(), true).await;
        let resolved = resources.matches(7).await.settle().await.unwrap();
        assert_eq!(resolved.value.len(), 1);

        let cached: Vec<EnrichedMatch> =
            resources.cache.read(matches_slot(7)).await.unwrap();
        assert_eq!(cached, resolved.value);
        assert_eq!(cached[0].name.as_deref(), Some("Eva"));
        assert_eq!(cached[0].unread_count, 2);
    }

    #[tokio::test]
    async fn cached_profile_of_another_user_is_never_served() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/profiles/user/8"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let (store, resources) = resources(&server.uri(), true).await;
        store
            .set(keys::PROFILE, r#"{"userId":7,"value":{"name":"Ana"}}"#)
            .await
            .unwrap();

        let load = resources.profile(8).await;
        assert!(load.cached().is_none());
        assert!(matches!(
            load.settle().await,
            Err(SyncError::Server { status: 503, .. })
        ));
    }

    #[tokio::test]
    async fn match_details_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/matches/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 1, "user1_id": 7, "user2_id": 9
            })))
            .mount(&server)
            .await;

        let (store, resources) = resources(&server.uri(), true).await;
        let details = resources.match_details(1).await.unwrap();
        assert_eq!(details.counterpart_of(7), 9);
        assert_eq!(store.get(keys::MATCHES).await.unwrap(), None);
    }
}
