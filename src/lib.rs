#![doc = include_str!("../README.md")]

#[cfg(feature = "http")]
pub mod api;
pub mod cache;
#[cfg(feature = "http")]
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod queries;
pub mod session;
pub mod storage;
pub mod token;
pub mod types;

// Re-exports for convenient access
#[cfg(feature = "http")]
pub use api::{ApiClient, ImageUpload};
pub use cache::{QueryCache, QueryKey, QueryOptions, QueryStatus, WriteOperation};
#[cfg(feature = "http")]
pub use client::Armoire;
pub use config::ClientConfig;
pub use error::{AuthFailure, Error};
pub use models::{
    ClothingItem, ClothingStats, LoginRequest, LoginResponse, OwnerInfo, Ping, RegisterRequest,
    RegisterResponse, SearchClothingParams, StylistMessage, UpdateClothingItem, User,
};
pub use queries::{UpdateClothing, UploadClothing};
pub use session::{Session, SessionState};
pub use storage::{FileTokenStore, MemoryTokenStore, TOKEN_KEY, TokenStore};
pub use token::{Claims, DecodeError, check_is_logged_in, decode_claims, is_token_expired};
pub use types::{ClothingId, UserId};
