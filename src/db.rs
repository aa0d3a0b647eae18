pub use self::error::DatabaseError;
pub use self::manager::DatabaseManager;
pub use self::models::{
    DeliveryLog, IngestOutcome, NewDeliveryLog, Post, PostEvent, PostStatus, TransitionFields,
    TransitionOutcome,
};
pub use self::stores::{DeliveryLogStore, PostStore};

pub mod error;
pub mod manager;
pub mod models;
pub mod postgres;
pub mod schema;
pub mod stores;
