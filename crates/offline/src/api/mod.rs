//! Remote API boundary
//!
//! The engine only talks to the marketplace backend through [`RemoteApi`].
//! [`HttpRemoteApi`] implements it over REST; tests substitute a scripted
//! implementation.

mod client;
mod credentials;

pub use client::HttpRemoteApi;
pub use credentials::{
    CredentialProvider, NoCredentials, SESSION_FILE, SessionFileCredentials, StaticToken,
};

use serde::{Deserialize, Serialize};

use crate::models::{
    Cart, CartMutation, CheckoutRequest, CheckoutResponse, Notification, Product, ProductFields,
    ProductQuery, ProductUpdate, User,
};

/// Failure of a remote call
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The request never produced a response (DNS, connect, timeout, TLS)
    #[error("network error: {0}")]
    Network(String),
    /// The server rejected the bearer token (401)
    #[error("not authenticated")]
    Unauthenticated,
    /// The server answered with a non-success status
    #[error("server returned status {code}")]
    Status { code: u16 },
    /// The response body could not be decoded
    #[error("invalid response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether retrying the same request cannot succeed
    ///
    /// Client errors are permanent except 408 (timeout) and 429 (rate
    /// limited). Authentication failures are transient since the session
    /// layer may refresh the token.
    pub fn is_permanent(&self) -> bool {
        match self {
            RemoteError::Status { code } => (400..500).contains(code) && *code != 408 && *code != 429,
            _ => false,
        }
    }

    /// Whether this is a 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::Status { code: 404 })
    }
}

impl From<ureq::Error> for RemoteError {
    fn from(e: ureq::Error) -> Self {
        match e {
            ureq::Error::StatusCode(401) => RemoteError::Unauthenticated,
            ureq::Error::StatusCode(code) => RemoteError::Status { code },
            ureq::Error::Json(e) => RemoteError::Decode(e.to_string()),
            other => RemoteError::Network(other.to_string()),
        }
    }
}

/// Identifier returned when the server creates an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedEntity {
    pub id: i64,
}

/// An image to attach to a published product
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub data: Vec<u8>,
}

/// Location of an uploaded image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadedImage {
    pub url: String,
}

/// Operations the engine needs from the marketplace backend
pub trait RemoteApi: Send + Sync {
    fn create_product(&self, product: &ProductFields) -> Result<CreatedEntity, RemoteError>;

    fn update_product(
        &self,
        product_id: i64,
        changes: &ProductUpdate,
    ) -> Result<Product, RemoteError>;

    fn delete_product(&self, product_id: i64) -> Result<(), RemoteError>;

    /// Attach an image to a product; the primary image becomes the listing thumbnail
    fn upload_product_image(
        &self,
        product_id: i64,
        image: &ImageUpload,
        is_primary: bool,
    ) -> Result<UploadedImage, RemoteError>;

    fn apply_cart_mutation(&self, mutation: &CartMutation) -> Result<(), RemoteError>;

    fn checkout(&self, request: &CheckoutRequest) -> Result<CheckoutResponse, RemoteError>;

    fn list_products(&self, query: &ProductQuery) -> Result<Vec<Product>, RemoteError>;

    /// The active cart, or None if the buyer has none
    fn get_cart(&self) -> Result<Option<Cart>, RemoteError>;

    fn list_notifications(&self) -> Result<Vec<Notification>, RemoteError>;

    fn current_user(&self) -> Result<User, RemoteError>;
}
