//! Domain models for the offline engine
//!
//! Remote entities (products, carts, notifications, the user) are cached
//! as served by the API. Drafts and queue records are local-only.

mod cart;
mod draft;
mod notification;
mod product;
mod sync_record;
mod user;

pub use cart::{
    CART_ACTIVE, Cart, CartItem, CartMutation, CheckoutRequest, CheckoutResponse, DeliveryMethod,
};
pub use draft::{Attachment, DraftProduct, DraftStatus, LocalId, NewAttachment};
pub use notification::Notification;
pub use product::{
    DEFAULT_PAGE_SIZE, Product, ProductFields, ProductQuery, ProductUpdate, ProductsResponse,
};
pub use sync_record::{Mutation, MutationKind, RecordStatus, SyncRecord};
pub use user::User;
