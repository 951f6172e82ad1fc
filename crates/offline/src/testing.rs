//! Test doubles: a scripted remote API and a store that can park a read

use anyhow::Result;
use std::sync::Mutex;
use std::sync::mpsc::{self, Receiver, Sender};

use crate::api::{CreatedEntity, ImageUpload, RemoteApi, RemoteError, UploadedImage};
use crate::models::{
    Cart, CartMutation, CheckoutRequest, CheckoutResponse, Notification, Product, ProductFields,
    ProductQuery, ProductUpdate, User,
};
use crate::storage::{
    Collection, InMemoryStore, IndexValue, LocalStore, RecordKey, StoredRecord, WriteOp,
};

pub fn sample_product(id: i64, category: &str) -> Product {
    Product {
        id,
        seller_id: 1,
        product_name: format!("Product {}", id),
        category: category.to_string(),
        description: None,
        quantity_available: 10.0,
        unit_of_measure: "kg".to_string(),
        price_per_unit: 5.0,
        minimum_order_quantity: 1.0,
        harvest_date: None,
        expected_shelf_life_days: None,
        farm_location: None,
        region: Some("Ashanti".to_string()),
        district: None,
        primary_image_url: None,
        additional_images: None,
        is_organic: false,
        status: "ACTIVE".to_string(),
        is_featured: false,
        is_negotiable: false,
        view_count: 0,
        order_count: 0,
        created_at: "2026-01-01T00:00:00Z".to_string(),
        updated_at: "2026-01-01T00:00:00Z".to_string(),
    }
}

pub fn sample_notification(id: i64, created_at: &str, is_read: bool) -> Notification {
    Notification {
        id,
        user_id: 1,
        kind: "ORDER_PLACED".to_string(),
        title: format!("Notification {}", id),
        message: "An order was placed".to_string(),
        is_read,
        related_order_id: None,
        related_product_id: None,
        data: None,
        created_at: created_at.to_string(),
    }
}

pub fn sample_user() -> User {
    User {
        id: 1,
        email: None,
        phone_number: "0244000000".to_string(),
        full_name: "Kofi Boateng".to_string(),
        user_type: "FARMER".to_string(),
        profile_image_url: None,
        is_verified: true,
        region: Some("Ashanti".to_string()),
        district: None,
        farm_name: None,
        created_at: "2026-01-01T00:00:00Z".to_string(),
    }
}

#[derive(Default)]
struct MockState {
    calls: Vec<String>,
    next_product_id: i64,
    create_attempts: usize,
    create_error: Option<RemoteError>,
    delete_error: Option<RemoteError>,
    failing_upload: Option<usize>,
    upload_count: usize,
    uploads: Vec<(i64, Vec<u8>, bool)>,
    read_error: Option<RemoteError>,
    products: Vec<Product>,
    cart: Option<Cart>,
    notifications: Vec<Notification>,
    user: Option<User>,
}

/// Remote API that records calls and answers from scripted state
pub struct MockRemote {
    state: Mutex<MockState>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MockState {
                next_product_id: 100,
                ..MockState::default()
            }),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    pub fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }

    pub fn uploads(&self) -> Vec<(i64, Vec<u8>, bool)> {
        self.with(|s| s.uploads.clone())
    }

    pub fn create_attempts(&self) -> usize {
        self.with(|s| s.create_attempts)
    }

    pub fn set_next_product_id(&self, id: i64) {
        self.with(|s| s.next_product_id = id);
    }

    pub fn fail_creates_with(&self, error: RemoteError) {
        self.with(|s| s.create_error = Some(error));
    }

    pub fn fail_deletes_with(&self, error: RemoteError) {
        self.with(|s| s.delete_error = Some(error));
    }

    /// Fail the nth image upload (zero-based, counted across all products)
    pub fn fail_uploads_at(&self, index: usize) {
        self.with(|s| s.failing_upload = Some(index));
    }

    /// Fail every read endpoint, or restore them with None
    pub fn fail_reads_with(&self, error: Option<RemoteError>) {
        self.with(|s| s.read_error = error);
    }

    pub fn set_products(&self, products: Vec<Product>) {
        self.with(|s| s.products = products);
    }

    pub fn set_cart(&self, cart: Option<Cart>) {
        self.with(|s| s.cart = cart);
    }

    pub fn set_notifications(&self, notifications: Vec<Notification>) {
        self.with(|s| s.notifications = notifications);
    }

    pub fn set_user(&self, user: Option<User>) {
        self.with(|s| s.user = user);
    }

    fn read<T>(&self, name: &str, f: impl FnOnce(&MockState) -> T) -> Result<T, RemoteError> {
        self.with(|s| {
            s.calls.push(name.to_string());
            match &s.read_error {
                Some(error) => Err(error.clone()),
                None => Ok(f(s)),
            }
        })
    }
}

impl RemoteApi for MockRemote {
    fn create_product(&self, _product: &ProductFields) -> Result<CreatedEntity, RemoteError> {
        self.with(|s| {
            s.calls.push("create_product".to_string());
            s.create_attempts += 1;
            if let Some(error) = &s.create_error {
                return Err(error.clone());
            }
            let id = s.next_product_id;
            s.next_product_id += 1;
            Ok(CreatedEntity { id })
        })
    }

    fn update_product(
        &self,
        product_id: i64,
        changes: &ProductUpdate,
    ) -> Result<Product, RemoteError> {
        self.with(|s| s.calls.push("update_product".to_string()));
        let mut product = sample_product(product_id, "VEGETABLES");
        if let Some(price) = changes.price_per_unit {
            product.price_per_unit = price;
        }
        Ok(product)
    }

    fn delete_product(&self, _product_id: i64) -> Result<(), RemoteError> {
        self.with(|s| {
            s.calls.push("delete_product".to_string());
            match &s.delete_error {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            }
        })
    }

    fn upload_product_image(
        &self,
        product_id: i64,
        image: &ImageUpload,
        is_primary: bool,
    ) -> Result<UploadedImage, RemoteError> {
        self.with(|s| {
            s.calls.push("upload_product_image".to_string());
            let index = s.upload_count;
            s.upload_count += 1;
            if s.failing_upload == Some(index) {
                return Err(RemoteError::Status { code: 500 });
            }
            s.uploads.push((product_id, image.data.clone(), is_primary));
            Ok(UploadedImage {
                url: format!("https://cdn.example/{}/{}", product_id, image.file_name),
            })
        })
    }

    fn apply_cart_mutation(&self, _mutation: &CartMutation) -> Result<(), RemoteError> {
        self.with(|s| s.calls.push("cart".to_string()));
        Ok(())
    }

    fn checkout(&self, _request: &CheckoutRequest) -> Result<CheckoutResponse, RemoteError> {
        self.with(|s| s.calls.push("checkout".to_string()));
        Ok(CheckoutResponse {
            order_id: 1,
            order_number: "ORD-0001".to_string(),
            total_amount: 10.0,
            payment_url: None,
        })
    }

    fn list_products(&self, query: &ProductQuery) -> Result<Vec<Product>, RemoteError> {
        self.read("list_products", |s| {
            s.products
                .iter()
                .filter(|p| query.category.as_ref().is_none_or(|c| &p.category == c))
                .cloned()
                .collect()
        })
    }

    fn get_cart(&self) -> Result<Option<Cart>, RemoteError> {
        self.read("get_cart", |s| s.cart.clone())
    }

    fn list_notifications(&self) -> Result<Vec<Notification>, RemoteError> {
        self.read("list_notifications", |s| s.notifications.clone())
    }

    fn current_user(&self) -> Result<User, RemoteError> {
        self.read("current_user", |s| s.user.clone())?
            .ok_or(RemoteError::Unauthenticated)
    }
}

/// A read the [`PausingStore`] parks on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PauseAt {
    Get(Collection),
    Query(Collection, &'static str),
}

struct ArmedPause {
    at: PauseAt,
    reached: Sender<()>,
    release: Receiver<()>,
}

/// Controls one parked read
pub struct PauseHandle {
    reached: Receiver<()>,
    release: Sender<()>,
}

impl PauseHandle {
    /// Block until the reader has its result and is parked
    pub fn wait_reached(&self) {
        self.reached.recv().unwrap();
    }

    pub fn release(self) {
        self.release.send(()).unwrap();
    }
}

/// In-memory store that parks the first matching read after it completes
///
/// The parked caller holds a stale result, so a test can run other work
/// before letting it continue.
pub struct PausingStore {
    inner: InMemoryStore,
    armed: Mutex<Option<ArmedPause>>,
}

impl PausingStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            armed: Mutex::new(None),
        }
    }

    pub fn pause_at(&self, at: PauseAt) -> PauseHandle {
        let (reached_tx, reached_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        *self.armed.lock().unwrap() = Some(ArmedPause {
            at,
            reached: reached_tx,
            release: release_rx,
        });
        PauseHandle {
            reached: reached_rx,
            release: release_tx,
        }
    }

    fn park_if_armed(&self, at: PauseAt) {
        let armed = {
            let mut guard = self.armed.lock().unwrap();
            match guard.as_ref() {
                Some(pause) if pause.at == at => guard.take(),
                _ => None,
            }
        };
        if let Some(pause) = armed {
            pause.reached.send(()).unwrap();
            pause.release.recv().unwrap();
        }
    }
}

impl LocalStore for PausingStore {
    fn write_batch(&self, ops: Vec<WriteOp>) -> Result<()> {
        self.inner.write_batch(ops)
    }

    fn get(&self, collection: Collection, key: &RecordKey) -> Result<Option<StoredRecord>> {
        let result = self.inner.get(collection, key);
        self.park_if_armed(PauseAt::Get(collection));
        result
    }

    fn query(
        &self,
        collection: Collection,
        index: &str,
        value: &IndexValue,
    ) -> Result<Vec<StoredRecord>> {
        let result = self.inner.query(collection, index, value);
        // Pause points name indexes as 'static strs from the schema
        if let Some(name) = collection.indexes().iter().find(|name| **name == index) {
            self.park_if_armed(PauseAt::Query(collection, name));
        }
        result
    }

    fn all(&self, collection: Collection) -> Result<Vec<StoredRecord>> {
        self.inner.all(collection)
    }

    fn allocate_id(&self, collection: Collection) -> Result<i64> {
        self.inner.allocate_id(collection)
    }
}
