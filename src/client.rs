use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::api::{ApiClient, ImageUpload};
use crate::cache::{QueryCache, QueryOptions};
use crate::config::ClientConfig;
use crate::error::Error;
use crate::models::{
    ClothingItem, ClothingStats, LoginRequest, LoginResponse, OwnerInfo, Ping, RegisterRequest,
    RegisterResponse, SearchClothingParams, StylistMessage, UpdateClothingItem, User,
};
use crate::queries::{self, UpdateClothing, UploadClothing, keys};
use crate::session::Session;
use crate::storage::{FileTokenStore, TokenStore};
use crate::types::ClothingId;

/// Armoire client: API access, the session context and the query cache.
///
/// ```rust,ignore
/// use armoire_client::{Armoire, ClientConfig, LoginRequest};
///
/// let armoire = Armoire::from_config(&ClientConfig::from_env()?)?;
/// if !armoire.is_logged_in() {
///     armoire.login(&LoginRequest::new("ada@example.com", "hunter2")).await?;
/// }
/// let stats = armoire.clothing_stats().await?;
/// ```
pub struct Armoire<S> {
    api: ApiClient,
    session: Arc<Session<S>>,
    cache: Arc<QueryCache>,
}

impl Armoire<FileTokenStore> {
    /// Client backed by the configured token file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no token path can be determined, or
    /// [`Error::Http`] if the HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, Error> {
        Ok(Self::new(ApiClient::from_config(config)?, config.token_store()?))
    }
}

impl<S: TokenStore> Armoire<S> {
    /// Responses cached for one identity are dropped as soon as the session
    /// sees another one (or none) in storage.
    pub fn new(api: ApiClient, store: S) -> Self {
        let session = Arc::new(Session::new(store));
        let cache = Arc::new(QueryCache::new());
        let hook_cache = Arc::clone(&cache);
        session.on_identity_change(move |subject| {
            tracing::info!(subject, "stored identity changed; clearing query cache");
            hook_cache.clear();
        });
        Self {
            api,
            session,
            cache,
        }
    }

    #[must_use]
    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    #[must_use]
    pub fn session(&self) -> &Arc<Session<S>> {
        &self.session
    }

    #[must_use]
    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.session.is_logged_in()
    }

    /// Starts polling the token slot for changes made by other processes.
    /// A different or missing identity clears the cache. Must be called from
    /// within a tokio runtime.
    pub fn watch_storage(&self, config: &ClientConfig) -> JoinHandle<()> {
        self.session.watch_storage(config.storage_poll_interval())
    }

    /// Logs in, persists the returned token and resets all client state.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if the credentials are rejected; the stored
    /// token is left as it was.
    pub async fn login(&self, req: &LoginRequest) -> Result<LoginResponse, Error> {
        let response = self.api.login(req).await.inspect_err(|e| {
            tracing::warn!(error = %e, "login failed");
        })?;
        self.switch_identity(&response.token)?;
        if let Some(user) = &response.user {
            self.session.set_user(user.clone());
        }
        tracing::info!("logged in");
        Ok(response)
    }

    /// Registers; when the backend returns a token, logs in with it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if the registration is rejected.
    pub async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, Error> {
        let response = self.api.register(req).await.inspect_err(|e| {
            tracing::warn!(error = %e, "registration failed");
        })?;
        if let Some(token) = &response.token {
            self.switch_identity(token)?;
            if let Some(user) = &response.user {
                self.session.set_user(user.clone());
            }
            tracing::info!("registered and logged in");
        }
        Ok(response)
    }

    /// Removes the stored token. With `reload`, also drops every cached
    /// response and the session profile, which is the only way to purge data
    /// tied to the old identity.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Storage`] if the token cannot be removed.
    pub fn logout(&self, reload: bool) -> Result<(), Error> {
        self.session.logout()?;
        if reload {
            self.reload();
        }
        tracing::info!(reload, "logged out");
        Ok(())
    }

    /// Discards all in-memory state and re-derives the session from storage.
    pub fn reload(&self) {
        self.cache.clear();
        self.session.reset();
    }

    /// Fetches the profile and stores it in the session.
    ///
    /// # Errors
    ///
    /// See [`user_info`](Self::user_info).
    pub async fn load_user(&self) -> Result<User, Error> {
        let user = self.user_info().await?;
        self.session.set_user(user.clone());
        Ok(user)
    }

    /// `GET /user/userinfo`, cached for 20 minutes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCredential`] without a stored token, otherwise any
    /// request error.
    pub async fn user_info(&self) -> Result<User, Error> {
        let token = self.require_token()?;
        let token = Some(token.as_str());
        self.cache
            .fetch(keys::user_info(), queries::user_info_options(), move || {
                self.api.user_info(token)
            })
            .await
    }

    /// `GET /clothing/stats`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCredential`] without a stored token, otherwise any
    /// request error.
    pub async fn clothing_stats(&self) -> Result<ClothingStats, Error> {
        let token = self.require_token()?;
        let token = Some(token.as_str());
        self.cache
            .fetch(keys::clothing_stats(), QueryOptions::new(), move || {
                self.api.clothing_stats(token)
            })
            .await
    }

    /// `POST /clothing/search`, cached per parameter set.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCredential`] without a stored token, otherwise any
    /// request error.
    pub async fn search_clothing(
        &self,
        params: &SearchClothingParams,
    ) -> Result<Vec<ClothingItem>, Error> {
        let token = self.require_token()?;
        let token = Some(token.as_str());
        self.cache
            .fetch(keys::clothing_search(params), QueryOptions::new(), move || {
                self.api.search_clothing(token, params)
            })
            .await
    }

    /// `GET /clothing/{id}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidClothingId`] for a reserved id and
    /// [`Error::NoCredential`] without a stored token, otherwise any request
    /// error.
    pub async fn clothing_item(&self, id: &ClothingId) -> Result<ClothingItem, Error> {
        id.validate()?;
        let token = self.require_token()?;
        let token = Some(token.as_str());
        self.cache
            .fetch(keys::clothing_item(id), QueryOptions::new(), move || {
                self.api.clothing_item(token, id)
            })
            .await
    }

    /// `GET /clothing/{id}/owner`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCredential`] without a stored token, otherwise any
    /// request error.
    pub async fn clothing_owner(&self, id: &ClothingId) -> Result<OwnerInfo, Error> {
        id.validate()?;
        let token = self.require_token()?;
        let token = Some(token.as_str());
        self.cache
            .fetch(keys::clothing_owner(id), QueryOptions::new(), move || {
                self.api.clothing_owner(token, id)
            })
            .await
    }

    /// `GET /dashboard/stylist`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCredential`] without a stored token, otherwise any
    /// request error.
    pub async fn dashboard_stylist(&self) -> Result<StylistMessage, Error> {
        let token = self.require_token()?;
        let token = Some(token.as_str());
        self.cache
            .fetch(keys::dashboard_stylist(), QueryOptions::new(), move || {
                self.api.dashboard_stylist(token)
            })
            .await
    }

    /// Uploads an image; on success stats and searches go stale.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCredential`] without a stored token, otherwise any
    /// request error. The cache is untouched on failure.
    pub async fn upload_clothing(&self, image: ImageUpload) -> Result<ClothingItem, Error> {
        let token = self.require_token()?;
        self.cache
            .run_write(
                &UploadClothing,
                self.api.upload_clothing(Some(token.as_str()), image),
            )
            .await
    }

    /// Patches an item; on success the item and searches go stale.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCredential`] without a stored token, otherwise any
    /// request error. The cache is untouched on failure.
    pub async fn update_clothing(
        &self,
        id: &ClothingId,
        patch: &UpdateClothingItem,
    ) -> Result<(), Error> {
        id.validate()?;
        let token = self.require_token()?;
        self.cache
            .run_write(
                &UpdateClothing::new(id.clone()),
                self.api.update_clothing(Some(token.as_str()), id, patch),
            )
            .await
    }

    /// `GET /ping`. Not cached.
    ///
    /// # Errors
    ///
    /// Any request error.
    pub async fn ping(&self) -> Result<Ping, Error> {
        self.api.ping().await
    }

    fn require_token(&self) -> Result<String, Error> {
        self.session.token()?.ok_or(Error::NoCredential)
    }

    fn switch_identity(&self, token: &str) -> Result<(), Error> {
        self.session.set_token(Some(token))?;
        self.reload();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryTokenStore;
    use crate::token::make_token;

    fn armoire(store: MemoryTokenStore) -> Armoire<MemoryTokenStore> {
        Armoire::new(ApiClient::new("http://127.0.0.1:9".parse().unwrap()), store)
    }

    #[tokio::test]
    async fn reads_without_token_fail_locally() {
        let armoire = armoire(MemoryTokenStore::new());
        assert!(matches!(armoire.clothing_stats().await, Err(Error::NoCredential)));
        assert!(matches!(armoire.user_info().await, Err(Error::NoCredential)));
        assert!(armoire.cache().is_empty());
    }

    #[tokio::test]
    async fn writes_without_token_fail_locally() {
        let armoire = armoire(MemoryTokenStore::new());
        armoire.cache().set(keys::clothing_stats(), &ClothingStats::default()).unwrap();

        let image = ImageUpload::new("a.png", vec![1, 2, 3]).unwrap();
        assert!(matches!(
            armoire.upload_clothing(image).await,
            Err(Error::NoCredential)
        ));
        assert_eq!(armoire.cache().is_stale(&keys::clothing_stats()), Some(false));
    }

    #[test]
    fn logout_without_reload_keeps_cache() {
        let token = make_token(r#"{"sub":"u1","exp":9999999999}"#);
        let armoire = armoire(MemoryTokenStore::with_token(token));
        assert!(armoire.is_logged_in());
        armoire.cache().set(keys::clothing_stats(), &ClothingStats::default()).unwrap();

        armoire.logout(false).unwrap();
        armoire.logout(false).unwrap();
        assert!(!armoire.is_logged_in());
        assert_eq!(armoire.session().store().load().unwrap(), None);
        assert!(armoire.cache().contains(&keys::clothing_stats()));
    }

    #[tokio::test]
    async fn reserved_ids_never_reach_the_cache() {
        let token = make_token(r#"{"sub":"u1","exp":9999999999}"#);
        let armoire = armoire(MemoryTokenStore::with_token(token));
        armoire.cache().set(keys::clothing_stats(), &ClothingStats::default()).unwrap();

        for id in ["stats", "search", ""] {
            let id = ClothingId::from(id);
            assert!(matches!(
                armoire.clothing_item(&id).await,
                Err(Error::InvalidClothingId(_))
            ));
            assert!(matches!(
                armoire.update_clothing(&id, &UpdateClothingItem::new().with_public(true)).await,
                Err(Error::InvalidClothingId(_))
            ));
        }
        assert_eq!(armoire.cache().keys(), vec![keys::clothing_stats()]);
        assert_eq!(armoire.cache().is_stale(&keys::clothing_stats()), Some(false));
    }

    #[test]
    fn external_identity_change_clears_cache() {
        let store = std::sync::Arc::new(MemoryTokenStore::with_token(make_token(
            r#"{"sub":"u1","exp":9999999999}"#,
        )));
        let armoire = Armoire::new(
            ApiClient::new("http://127.0.0.1:9".parse().unwrap()),
            Arc::clone(&store),
        );
        armoire.cache().set(keys::clothing_stats(), &ClothingStats::default()).unwrap();

        armoire.session().refresh();
        assert!(armoire.cache().contains(&keys::clothing_stats()));

        store.store(&make_token(r#"{"sub":"u2","exp":9999999999}"#)).unwrap();
        armoire.session().refresh();
        assert_eq!(armoire.session().state().subject.as_deref(), Some("u2"));
        assert!(armoire.cache().is_empty());

        armoire.cache().set(keys::clothing_stats(), &ClothingStats::default()).unwrap();
        store.clear().unwrap();
        armoire.session().refresh();
        assert!(!armoire.is_logged_in());
        assert!(armoire.cache().is_empty());
    }

    #[test]
    fn logout_with_reload_purges_everything() {
        let token = make_token(r#"{"sub":"u1","exp":9999999999}"#);
        let armoire = armoire(MemoryTokenStore::with_token(token));
        armoire.session().set_user(User::new("u1"));
        armoire.cache().set(keys::user_info(), &User::new("u1")).unwrap();

        armoire.logout(true).unwrap();
        assert!(armoire.cache().is_empty());
        assert_eq!(armoire.session().user(), None);
    }
}
