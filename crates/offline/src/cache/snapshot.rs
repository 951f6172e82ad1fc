use anyhow::Result;
use log::{debug, warn};
use std::sync::Arc;

use crate::api::{RemoteApi, RemoteError};
use crate::models::{CART_ACTIVE, Cart, CartItem, Notification, Product, ProductQuery, User};
use crate::network::NetworkMonitor;
use crate::storage::{EntityStore, LocalStore, WriteOp};

/// Read-through cache of remote state with offline fallback
///
/// Cached data is advisory: it is whatever the last successful fetch
/// returned and is never merged with queued mutations.
pub struct SnapshotCache {
    store: Arc<dyn LocalStore>,
    remote: Arc<dyn RemoteApi>,
    network: NetworkMonitor,
}

impl SnapshotCache {
    pub fn new(
        store: Arc<dyn LocalStore>,
        remote: Arc<dyn RemoteApi>,
        network: NetworkMonitor,
    ) -> Self {
        Self {
            store,
            remote,
            network,
        }
    }

    /// Fetch from the remote when online; None means use the cache
    fn fetch<T>(
        &self,
        what: &str,
        f: impl FnOnce(&dyn RemoteApi) -> Result<T, RemoteError>,
    ) -> Option<T> {
        if !self.network.is_online() {
            debug!("Offline; serving cached {}", what);
            return None;
        }
        match f(self.remote.as_ref()) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Failed to fetch {}, serving cache: {}", what, e);
                None
            }
        }
    }

    /// Products matching `query`, from the remote or the cache
    pub fn products(&self, query: &ProductQuery) -> Result<Vec<Product>> {
        match self.fetch("products", |remote| remote.list_products(query)) {
            Some(products) => {
                let ops = products
                    .iter()
                    .map(WriteOp::put)
                    .collect::<Result<Vec<_>>>()?;
                if let Err(e) = self.store.write_batch(ops) {
                    warn!("Failed to cache products: {:#}", e);
                }
                Ok(products)
            }
            None => self.query_cached_products(query),
        }
    }

    /// Cached products, optionally in one category, ordered by id
    pub fn cached_products(&self, category: Option<&str>) -> Result<Vec<Product>> {
        self.query_cached_products(&ProductQuery {
            category: category.map(str::to_string),
            ..ProductQuery::default()
        })
    }

    /// Cached products matching `query`, ordered by id then paged
    ///
    /// The narrowest indexed filter selects candidates; the others apply in
    /// memory.
    pub fn query_cached_products(&self, query: &ProductQuery) -> Result<Vec<Product>> {
        let mut products: Vec<Product> = if let Some(seller_id) = query.seller_id {
            self.store.query_entities("seller_id", seller_id)?
        } else if let Some(region) = &query.region {
            self.store.query_entities("region", region.as_str())?
        } else if let Some(category) = &query.category {
            self.store.query_entities("category", category.as_str())?
        } else {
            self.store.all_entities()?
        };
        products.retain(|product| query.matches(product));
        products.sort_by_key(|p| p.id);
        Ok(query.paginate(products))
    }

    pub fn cached_product(&self, product_id: i64) -> Result<Option<Product>> {
        self.store.get_entity(product_id)
    }

    pub fn clear_products(&self) -> Result<()> {
        self.store.clear_entities::<Product>()
    }

    /// The active cart with its items
    pub fn cart(&self) -> Result<Option<Cart>> {
        match self.fetch("cart", |remote| remote.get_cart()) {
            Some(cart) => {
                if let Err(e) = self.replace_cart(cart.as_ref()) {
                    warn!("Failed to cache cart: {:#}", e);
                }
                Ok(cart)
            }
            None => self.cached_cart(),
        }
    }

    /// Replace the cart snapshot; items are stored in their own collection
    fn replace_cart(&self, cart: Option<&Cart>) -> Result<()> {
        let mut ops = vec![WriteOp::clear::<Cart>(), WriteOp::clear::<CartItem>()];
        if let Some(cart) = cart {
            let header = Cart {
                items: Vec::new(),
                ..cart.clone()
            };
            ops.push(WriteOp::put(&header)?);
            for item in &cart.items {
                ops.push(WriteOp::put(item)?);
            }
        }
        self.store.write_batch(ops)
    }

    /// The cached active cart with its items
    pub fn cached_cart(&self) -> Result<Option<Cart>> {
        let carts: Vec<Cart> = self.store.query_entities("status", CART_ACTIVE)?;
        let Some(mut cart) = carts.into_iter().next() else {
            return Ok(None);
        };
        let mut items: Vec<CartItem> = self.store.query_entities("cart_id", cart.id)?;
        items.sort_by_key(|i| i.id);
        cart.items = items;
        Ok(Some(cart))
    }

    /// Notifications, newest first
    pub fn notifications(&self) -> Result<Vec<Notification>> {
        match self.fetch("notifications", |remote| remote.list_notifications()) {
            Some(notifications) => {
                let mut ops = vec![WriteOp::clear::<Notification>()];
                for notification in &notifications {
                    ops.push(WriteOp::put(notification)?);
                }
                if let Err(e) = self.store.write_batch(ops) {
                    warn!("Failed to cache notifications: {:#}", e);
                }
                Ok(notifications)
            }
            None => self.cached_notifications(),
        }
    }

    /// Cached notifications, newest first
    pub fn cached_notifications(&self) -> Result<Vec<Notification>> {
        let mut notifications: Vec<Notification> = self.store.all_entities()?;
        notifications.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| b.id.cmp(&a.id))
        });
        Ok(notifications)
    }

    /// Mark a cached notification read; false if it is not cached
    pub fn mark_notification_read(&self, notification_id: i64) -> Result<bool> {
        let Some(mut notification) = self.store.get_entity::<Notification>(notification_id)? else {
            return Ok(false);
        };
        notification.is_read = true;
        self.store.put_entity(&notification)?;
        Ok(true)
    }

    pub fn unread_notification_count(&self) -> Result<usize> {
        Ok(self
            .store
            .query_entities::<Notification>("is_read", false)?
            .len())
    }

    /// The signed-in user's profile
    pub fn user(&self) -> Result<Option<User>> {
        match self.fetch("user", |remote| remote.current_user()) {
            Some(user) => {
                let ops = vec![WriteOp::clear::<User>(), WriteOp::put(&user)?];
                if let Err(e) = self.store.write_batch(ops) {
                    warn!("Failed to cache user: {:#}", e);
                }
                Ok(Some(user))
            }
            None => self.cached_user(),
        }
    }

    pub fn cached_user(&self) -> Result<Option<User>> {
        let users: Vec<User> = self.store.all_entities()?;
        Ok(users.into_iter().next())
    }

    pub fn clear_user(&self) -> Result<()> {
        self.store.clear_entities::<User>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Collection, InMemoryStore};
    use crate::testing::{MockRemote, sample_notification, sample_product, sample_user};

    fn cache(online: bool) -> (Arc<InMemoryStore>, Arc<MockRemote>, NetworkMonitor, SnapshotCache) {
        let store = Arc::new(InMemoryStore::new());
        let remote = Arc::new(MockRemote::new());
        let network = NetworkMonitor::new(online);
        let cache = SnapshotCache::new(store.clone(), remote.clone(), network.clone());
        (store, remote, network, cache)
    }

    fn sample_cart() -> Cart {
        Cart {
            id: 7,
            buyer_id: 2,
            farmer_id: 1,
            status: CART_ACTIVE.to_string(),
            expires_at: None,
            created_at: String::new(),
            updated_at: String::new(),
            items: vec![
                CartItem {
                    id: 2,
                    cart_id: 7,
                    product_id: 11,
                    quantity: 1.0,
                    unit_price_snapshot: 5.0,
                    added_at: String::new(),
                    updated_at: String::new(),
                },
                CartItem {
                    id: 1,
                    cart_id: 7,
                    product_id: 10,
                    quantity: 3.0,
                    unit_price_snapshot: 5.0,
                    added_at: String::new(),
                    updated_at: String::new(),
                },
            ],
            subtotal: 20.0,
            platform_fee: 1.0,
            delivery_fee: 0.0,
            total: 21.0,
        }
    }

    #[test]
    fn test_products_cached_then_served_offline() {
        let (_, remote, network, cache) = cache(true);
        remote.set_products(vec![
            sample_product(2, "FRUITS"),
            sample_product(1, "VEGETABLES"),
        ]);

        assert_eq!(cache.products(&ProductQuery::default()).unwrap().len(), 2);

        network.report(false);
        let cached = cache.products(&ProductQuery::default()).unwrap();
        assert_eq!(cached.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 2]);
        let fruits = cache.products(&ProductQuery::category("FRUITS")).unwrap();
        assert_eq!(fruits.len(), 1);
        assert_eq!(fruits[0].id, 2);
    }

    #[test]
    fn test_offline_products_apply_whole_query() {
        let (store, _, _, cache) = cache(false);
        let mut okra = sample_product(1, "VEGETABLES");
        okra.seller_id = 5;
        okra.product_name = "Fresh Okra".to_string();
        let mut yam = sample_product(2, "TUBERS");
        yam.seller_id = 9;
        yam.region = Some("Northern".to_string());
        let mut garden_eggs = sample_product(3, "VEGETABLES");
        garden_eggs.seller_id = 5;
        store.bulk_put_entities(&[okra, yam, garden_eggs]).unwrap();

        let ids = |query: ProductQuery| {
            cache
                .products(&query)
                .unwrap()
                .iter()
                .map(|p| p.id)
                .collect::<Vec<_>>()
        };

        let mine = ProductQuery {
            seller_id: Some(5),
            ..ProductQuery::default()
        };
        assert_eq!(ids(mine), vec![1, 3]);
        let northern = ProductQuery {
            region: Some("Northern".to_string()),
            ..ProductQuery::default()
        };
        assert_eq!(ids(northern), vec![2]);
        let search = ProductQuery {
            seller_id: Some(5),
            search: Some("OKRA".to_string()),
            ..ProductQuery::default()
        };
        assert_eq!(ids(search), vec![1]);
        let second_page = ProductQuery {
            page: Some(2),
            limit: Some(2),
            ..ProductQuery::default()
        };
        assert_eq!(ids(second_page), vec![3]);
    }

    #[test]
    fn test_fetch_failure_falls_back_to_cache() {
        let (store, remote, _, cache) = cache(true);
        store.put_entity(&sample_product(5, "GRAINS")).unwrap();
        remote.fail_reads_with(Some(RemoteError::Network("timed out".to_string())));

        let products = cache.products(&ProductQuery::default()).unwrap();

        assert_eq!(products.len(), 1);
        assert_eq!(products[0].id, 5);
    }

    #[test]
    fn test_empty_cache_offline_is_empty() {
        let (_, remote, _, cache) = cache(false);
        assert!(cache.products(&ProductQuery::default()).unwrap().is_empty());
        assert!(cache.cart().unwrap().is_none());
        assert!(cache.user().unwrap().is_none());
        assert!(remote.calls().is_empty());
    }

    #[test]
    fn test_cart_snapshot_roundtrip() {
        let (store, remote, network, cache) = cache(true);
        remote.set_cart(Some(sample_cart()));

        assert_eq!(cache.cart().unwrap(), Some(sample_cart()));
        assert_eq!(store.count(Collection::CartItems).unwrap(), 2);

        network.report(false);
        let cached = cache.cart().unwrap().unwrap();
        assert_eq!(cached.id, 7);
        assert_eq!(cached.items.iter().map(|i| i.id).collect::<Vec<_>>(), vec![1, 2]);

        // An emptied remote cart clears the snapshot
        network.report(true);
        remote.set_cart(None);
        assert!(cache.cart().unwrap().is_none());
        assert_eq!(store.count(Collection::Cart).unwrap(), 0);
        assert_eq!(store.count(Collection::CartItems).unwrap(), 0);
    }

    #[test]
    fn test_notifications_newest_first_and_mark_read() {
        let (_, remote, network, cache) = cache(true);
        remote.set_notifications(vec![
            sample_notification(1, "2026-03-01T10:00:00Z", false),
            sample_notification(2, "2026-03-02T10:00:00Z", false),
            sample_notification(3, "2026-02-27T10:00:00Z", true),
        ]);
        cache.notifications().unwrap();
        network.report(false);

        let cached = cache.notifications().unwrap();
        assert_eq!(cached.iter().map(|n| n.id).collect::<Vec<_>>(), vec![2, 1, 3]);
        assert_eq!(cache.unread_notification_count().unwrap(), 2);

        assert!(cache.mark_notification_read(2).unwrap());
        assert!(!cache.mark_notification_read(99).unwrap());
        assert_eq!(cache.unread_notification_count().unwrap(), 1);
    }

    #[test]
    fn test_user_cached_and_cleared() {
        let (_, remote, network, cache) = cache(true);
        remote.set_user(Some(sample_user()));

        assert_eq!(cache.user().unwrap(), Some(sample_user()));
        network.report(false);
        assert_eq!(cache.user().unwrap(), Some(sample_user()));

        cache.clear_user().unwrap();
        assert!(cache.cached_user().unwrap().is_none());
    }
}
