use std::path::Path;

use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::ClientConfig;
use crate::error::{AuthFailure, Error};
use crate::models::{
    ClothingItem, ClothingStats, LoginRequest, LoginResponse, OwnerInfo, Ping, RegisterRequest,
    RegisterResponse, SearchClothingParams, StylistMessage, UpdateClothingItem, User,
};
use crate::token;
use crate::types::ClothingId;

/// Image file for `POST /clothing/upload`.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
}

impl ImageUpload {
    /// Wraps in-memory image bytes, inferring the content type from the
    /// file extension.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedImage`] unless the extension is one of
    /// png, jpg, jpeg, bmp or webp.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, Error> {
        let file_name = file_name.into();
        let content_type = image_content_type(&file_name)
            .ok_or_else(|| Error::UnsupportedImage(file_name.clone()))?;
        Ok(Self {
            file_name,
            content_type,
            bytes,
        })
    }

    /// Reads an image from disk.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnsupportedImage`] for other extensions, or
    /// [`Error::Storage`] if the file cannot be read.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::UnsupportedImage(path.display().to_string()))?
            .to_owned();
        image_content_type(&file_name).ok_or_else(|| Error::UnsupportedImage(file_name.clone()))?;
        let bytes = std::fs::read(path)?;
        Self::new(file_name, bytes)
    }
}

fn image_content_type(file_name: &str) -> Option<&'static str> {
    let (_, ext) = file_name.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "bmp" => Some("image/bmp"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

/// Typed HTTP client for the Armoire backend.
///
/// Authenticated calls take the stored token. `None` (or an empty token)
/// fails with [`Error::NoCredential`] before any request is sent.
#[derive(Debug, Clone)]
pub struct ApiClient {
    base_url: Url,
    http: reqwest::Client,
}

impl ApiClient {
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url: with_trailing_slash(base_url),
            http: reqwest::Client::new(),
        }
    }

    /// Builds a client with the configured base URL and request timeout.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`] if the HTTP client cannot be built.
    pub fn from_config(config: &ClientConfig) -> Result<Self, Error> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout() {
            builder = builder.timeout(timeout);
        }
        Ok(Self::new(config.api_base_url().clone()).with_http_client(builder.build()?))
    }

    /// Replaces the underlying reqwest client, e.g. one with proxies or
    /// custom TLS roots configured.
    #[must_use]
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// `POST /auth/login`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if the backend rejects the credentials.
    pub async fn login(&self, req: &LoginRequest) -> Result<LoginResponse, Error> {
        let response = self.http.post(self.endpoint("auth/login")?).json(req).send().await?;
        match Self::ensure_success(response, "login").await {
            Ok(response) => Self::decode(response, "login").await,
            Err(Error::Api { status, message, .. }) => {
                Err(AuthFailure::from_login(status, message).into())
            }
            Err(e) => Err(e),
        }
    }

    /// `POST /auth/register`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if the backend rejects the registration.
    pub async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, Error> {
        let response = self
            .http
            .post(self.endpoint("auth/register")?)
            .json(req)
            .send()
            .await?;
        match Self::ensure_success(response, "register").await {
            Ok(response) => Self::decode(response, "register").await,
            Err(Error::Api { status, message, .. }) => {
                Err(AuthFailure::from_register(status, message).into())
            }
            Err(e) => Err(e),
        }
    }

    /// `GET /user/userinfo`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCredential`], [`Error::Http`], [`Error::Api`] or
    /// [`Error::Decode`].
    pub async fn user_info(&self, token: Option<&str>) -> Result<User, Error> {
        let token = bearer(token)?;
        let response = self
            .http
            .get(self.endpoint("user/userinfo")?)
            .bearer_auth(token)
            .send()
            .await?;
        let response = Self::ensure_success(response, "user info").await?;
        Self::decode(response, "user info").await
    }

    /// `POST /clothing/upload` with the image as multipart field `image`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCredential`], [`Error::Http`], [`Error::Api`] or
    /// [`Error::Decode`].
    pub async fn upload_clothing(
        &self,
        token: Option<&str>,
        image: ImageUpload,
    ) -> Result<ClothingItem, Error> {
        let token = bearer(token)?;
        let part = Part::bytes(image.bytes)
            .file_name(image.file_name)
            .mime_str(image.content_type)?;
        let response = self
            .http
            .post(self.endpoint("clothing/upload")?)
            .bearer_auth(token)
            .multipart(Form::new().part("image", part))
            .send()
            .await?;
        let response = Self::ensure_success(response, "clothing upload").await?;
        Self::decode(response, "clothing upload").await
    }

    /// `POST /clothing/search`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCredential`], [`Error::Http`], [`Error::Api`] or
    /// [`Error::Decode`].
    pub async fn search_clothing(
        &self,
        token: Option<&str>,
        params: &SearchClothingParams,
    ) -> Result<Vec<ClothingItem>, Error> {
        let token = bearer(token)?;
        let response = self
            .http
            .post(self.endpoint("clothing/search")?)
            .bearer_auth(token)
            .json(params)
            .send()
            .await?;
        let response = Self::ensure_success(response, "clothing search").await?;
        Self::decode(response, "clothing search").await
    }

    /// `GET /clothing/stats`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCredential`], [`Error::Http`], [`Error::Api`] or
    /// [`Error::Decode`].
    pub async fn clothing_stats(&self, token: Option<&str>) -> Result<ClothingStats, Error> {
        self.get_json(token, "clothing/stats", "clothing stats").await
    }

    /// `GET /clothing/{id}`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCredential`], [`Error::Http`], [`Error::Api`] or
    /// [`Error::Decode`].
    pub async fn clothing_item(
        &self,
        token: Option<&str>,
        id: &ClothingId,
    ) -> Result<ClothingItem, Error> {
        self.get_json(token, &item_path(id, "")?, "clothing item")
            .await
    }

    /// `PATCH /clothing/{id}`. The response body is not interpreted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCredential`], [`Error::Http`] or [`Error::Api`].
    pub async fn update_clothing(
        &self,
        token: Option<&str>,
        id: &ClothingId,
        patch: &UpdateClothingItem,
    ) -> Result<(), Error> {
        let token = bearer(token)?;
        let response = self
            .http
            .patch(self.endpoint(&item_path(id, "")?)?)
            .bearer_auth(token)
            .json(patch)
            .send()
            .await?;
        Self::ensure_success(response, "clothing update").await?;
        Ok(())
    }

    /// `GET /clothing/{id}/owner`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCredential`], [`Error::Http`], [`Error::Api`] or
    /// [`Error::Decode`].
    pub async fn clothing_owner(
        &self,
        token: Option<&str>,
        id: &ClothingId,
    ) -> Result<OwnerInfo, Error> {
        self.get_json(token, &item_path(id, "/owner")?, "clothing owner")
            .await
    }

    /// `GET /dashboard/stylist`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoCredential`], [`Error::Http`], [`Error::Api`] or
    /// [`Error::Decode`].
    pub async fn dashboard_stylist(&self, token: Option<&str>) -> Result<StylistMessage, Error> {
        self.get_json(token, "dashboard/stylist", "dashboard stylist")
            .await
    }

    /// `GET /ping`. Unauthenticated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Http`], [`Error::Api`] or [`Error::Decode`].
    pub async fn ping(&self) -> Result<Ping, Error> {
        let response = self.http.get(self.endpoint("ping")?).send().await?;
        let response = Self::ensure_success(response, "ping").await?;
        Self::decode(response, "ping").await
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        token: Option<&str>,
        path: &str,
        operation: &'static str,
    ) -> Result<T, Error> {
        let token = bearer(token)?;
        let response = self
            .http
            .get(self.endpoint(path)?)
            .bearer_auth(token)
            .send()
            .await?;
        let response = Self::ensure_success(response, operation).await?;
        Self::decode(response, operation).await
    }

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Config(format!("invalid endpoint {path}: {e}")))
    }

    /// Passes 2xx responses through; anything else becomes [`Error::Api`]
    /// carrying the backend's message.
    async fn ensure_success(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<reqwest::Response, Error> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let message = error_message(&body);
        tracing::debug!(operation, status, message = %message, "request rejected");
        Err(Error::Api {
            operation,
            status,
            message,
        })
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
        operation: &'static str,
    ) -> Result<T, Error> {
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|source| Error::Decode { operation, source })
    }
}

fn bearer(token: Option<&str>) -> Result<&str, Error> {
    token::normalize(token).ok_or(Error::NoCredential)
}

/// `clothing/<id><suffix>` with the id percent-encoded as one segment.
fn item_path(id: &ClothingId, suffix: &str) -> Result<String, Error> {
    id.validate()?;
    Ok(format!("clothing/{}{suffix}", urlencoding::encode(id.as_str())))
}

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Backend errors are `{"error": "..."}` or plain text.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_owned))
        .unwrap_or_else(|| body.trim().to_owned())
}
