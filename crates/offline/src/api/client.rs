//! REST client for the marketplace backend
//!
//! Uses synchronous HTTP (ureq) to be executor-agnostic.

use anyhow::Context;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use ureq::{Agent, RequestBuilder};
use url::Url;
use uuid::Uuid;

use super::{CreatedEntity, CredentialProvider, ImageUpload, RemoteApi, RemoteError, UploadedImage};
use crate::models::{
    Cart, CartMutation, CheckoutRequest, CheckoutResponse, Notification, Product, ProductFields,
    ProductQuery, ProductUpdate, ProductsResponse, User,
};

/// HTTP implementation of [`RemoteApi`]
///
/// Every request carries the provider's bearer token when one is available.
pub struct HttpRemoteApi {
    agent: Agent,
    base_url: Url,
    credentials: Arc<dyn CredentialProvider>,
}

impl HttpRemoteApi {
    /// Per-request timeout
    const TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a client for the backend at `base_url` (e.g. `https://api.agromarket.example`)
    pub fn new(base_url: &str, credentials: Arc<dyn CredentialProvider>) -> anyhow::Result<Self> {
        let mut base_url =
            Url::parse(base_url).with_context(|| format!("Invalid API base URL: {}", base_url))?;
        // Url::join replaces the last segment unless the path ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let config = Agent::config_builder()
            .timeout_global(Some(Self::TIMEOUT))
            .build();

        Ok(Self {
            agent: Agent::new_with_config(config),
            base_url,
            credentials,
        })
    }

    fn endpoint(&self, path: &str) -> Result<String, RemoteError> {
        self.base_url
            .join(&format!("api/v1/{}", path))
            .map(String::from)
            .map_err(|e| RemoteError::Network(format!("invalid endpoint {}: {}", path, e)))
    }

    fn authorized<B>(&self, request: RequestBuilder<B>) -> RequestBuilder<B> {
        match self.credentials.bearer_token() {
            Some(token) => request.header("Authorization", &format!("Bearer {}", token)),
            None => request,
        }
    }

    fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RemoteError> {
        let mut request = self.authorized(self.agent.get(&self.endpoint(path)?));
        for (name, value) in query {
            request = request.query(*name, value);
        }
        let mut response = request.call()?;
        Ok(response.body_mut().read_json()?)
    }

    fn post_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, RemoteError> {
        let mut response = self
            .authorized(self.agent.post(&self.endpoint(path)?))
            .send_json(body)?;
        Ok(response.body_mut().read_json()?)
    }

    fn put_json<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, RemoteError> {
        let mut response = self
            .authorized(self.agent.put(&self.endpoint(path)?))
            .send_json(body)?;
        Ok(response.body_mut().read_json()?)
    }

    fn send_json_discarding<B: Serialize>(
        &self,
        request: RequestBuilder<ureq::typestate::WithBody>,
        body: &B,
    ) -> Result<(), RemoteError> {
        self.authorized(request).send_json(body)?;
        Ok(())
    }

    fn delete(&self, path: &str) -> Result<(), RemoteError> {
        self.authorized(self.agent.delete(&self.endpoint(path)?))
            .call()?;
        Ok(())
    }
}

/// Encode a multipart/form-data body with the image and its primary flag
fn multipart_body(boundary: &str, image: &ImageUpload, is_primary: bool) -> Vec<u8> {
    let file_name = image.file_name.replace(['"', '\r', '\n'], "_");
    let mut body = Vec::with_capacity(image.data.len() + 512);
    body.extend_from_slice(
        format!(
            "--{boundary}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
             Content-Type: {}\r\n\r\n",
            image.content_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(&image.data);
    body.extend_from_slice(
        format!(
            "\r\n--{boundary}\r\n\
             Content-Disposition: form-data; name=\"is_primary\"\r\n\r\n\
             {is_primary}\r\n\
             --{boundary}--\r\n"
        )
        .as_bytes(),
    );
    body
}

impl RemoteApi for HttpRemoteApi {
    fn create_product(&self, product: &ProductFields) -> Result<CreatedEntity, RemoteError> {
        self.post_json("products", product)
    }

    fn update_product(
        &self,
        product_id: i64,
        changes: &ProductUpdate,
    ) -> Result<Product, RemoteError> {
        self.put_json(&format!("products/{}", product_id), changes)
    }

    fn delete_product(&self, product_id: i64) -> Result<(), RemoteError> {
        self.delete(&format!("products/{}", product_id))
    }

    fn upload_product_image(
        &self,
        product_id: i64,
        image: &ImageUpload,
        is_primary: bool,
    ) -> Result<UploadedImage, RemoteError> {
        let boundary = format!("agromarket-{}", Uuid::new_v4().simple());
        let body = multipart_body(&boundary, image, is_primary);
        let url = self.endpoint(&format!("products/{}/images", product_id))?;

        let mut response = self
            .authorized(self.agent.post(&url))
            .header(
                "Content-Type",
                &format!("multipart/form-data; boundary={}", boundary),
            )
            .send(&body[..])?;
        Ok(response.body_mut().read_json()?)
    }

    fn apply_cart_mutation(&self, mutation: &CartMutation) -> Result<(), RemoteError> {
        match mutation {
            CartMutation::AddItem {
                product_id,
                quantity,
            } => self.send_json_discarding(
                self.agent.post(&self.endpoint("cart/items")?),
                &serde_json::json!({ "product_id": product_id, "quantity": quantity }),
            ),
            CartMutation::UpdateItem { item_id, quantity } => self.send_json_discarding(
                self.agent
                    .put(&self.endpoint(&format!("cart/items/{}", item_id))?),
                &serde_json::json!({ "quantity": quantity }),
            ),
            CartMutation::RemoveItem { item_id } => {
                self.delete(&format!("cart/items/{}", item_id))
            }
            CartMutation::Clear => self.delete("cart"),
        }
    }

    fn checkout(&self, request: &CheckoutRequest) -> Result<CheckoutResponse, RemoteError> {
        self.post_json("cart/checkout", request)
    }

    fn list_products(&self, query: &ProductQuery) -> Result<Vec<Product>, RemoteError> {
        let response: ProductsResponse = self.get_json("products", &query.to_pairs())?;
        Ok(response.products)
    }

    fn get_cart(&self) -> Result<Option<Cart>, RemoteError> {
        match self.get_json("cart", &[]) {
            Ok(cart) => Ok(Some(cart)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn list_notifications(&self) -> Result<Vec<Notification>, RemoteError> {
        self.get_json("notifications", &[])
    }

    fn current_user(&self) -> Result<User, RemoteError> {
        self.get_json("users/me", &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{NoCredentials, StaticToken};
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::sync::mpsc;
    use std::thread;

    /// Serve one canned response and hand back the raw request head
    fn serve_once(status: &str, body: &str) -> (String, mpsc::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = stream.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                head.extend_from_slice(&buf[..n]);
            }
            stream.write_all(response.as_bytes()).unwrap();
            tx.send(String::from_utf8_lossy(&head).to_string()).unwrap();
        });
        (base, rx)
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let api = HttpRemoteApi::new("https://example.com/backend", Arc::new(NoCredentials)).unwrap();
        assert_eq!(
            api.endpoint("products/4").unwrap(),
            "https://example.com/backend/api/v1/products/4"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(HttpRemoteApi::new("not a url", Arc::new(NoCredentials)).is_err());
    }

    #[test]
    fn test_get_sends_bearer_token() {
        let (base, rx) = serve_once(
            "200 OK",
            r#"{"id": 3, "phone_number": "0244000000", "full_name": "Ama Mensah", "user_type": "FARMER"}"#,
        );
        let api = HttpRemoteApi::new(&base, Arc::new(StaticToken::new("secret"))).unwrap();

        let user = api.current_user().unwrap();

        assert_eq!(user.full_name, "Ama Mensah");
        let head = rx.recv().unwrap();
        assert!(head.starts_with("GET /api/v1/users/me "));
        assert!(head.to_ascii_lowercase().contains("authorization: bearer secret"));
    }

    #[test]
    fn test_missing_cart_is_none() {
        let (base, _rx) = serve_once("404 Not Found", r#"{"detail": "no cart"}"#);
        let api = HttpRemoteApi::new(&base, Arc::new(NoCredentials)).unwrap();
        assert_eq!(api.get_cart().unwrap(), None);
    }

    #[test]
    fn test_validation_rejection_maps_to_status() {
        let (base, _rx) = serve_once("422 Unprocessable Entity", r#"{"detail": "bad"}"#);
        let api = HttpRemoteApi::new(&base, Arc::new(NoCredentials)).unwrap();
        let fields = ProductFields::new("Cassava", "TUBERS", 10.0, "bag", 80.0);

        let err = api.create_product(&fields).unwrap_err();

        assert_eq!(err, RemoteError::Status { code: 422 });
        assert!(err.is_permanent());
    }

    #[test]
    fn test_unreachable_host_is_network_error() {
        // Bind then drop to get a port nobody listens on
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let api = HttpRemoteApi::new(&format!("http://127.0.0.1:{}", port), Arc::new(NoCredentials))
            .unwrap();
        let err = api.list_notifications().unwrap_err();
        assert!(matches!(err, RemoteError::Network(_)));
        assert!(!err.is_permanent());
    }

    #[test]
    fn test_multipart_body_layout() {
        let image = ImageUpload {
            file_name: "product-image-0.jpg".to_string(),
            content_type: "image/jpeg".to_string(),
            data: b"JPEGDATA".to_vec(),
        };
        let body = String::from_utf8(multipart_body("XYZ", &image, true)).unwrap();

        assert!(body.starts_with("--XYZ\r\n"));
        assert!(body.contains("name=\"file\"; filename=\"product-image-0.jpg\""));
        assert!(body.contains("Content-Type: image/jpeg\r\n\r\nJPEGDATA\r\n"));
        assert!(body.contains("name=\"is_primary\"\r\n\r\ntrue\r\n"));
        assert!(body.ends_with("--XYZ--\r\n"));
    }
}
