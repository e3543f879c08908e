mod order;
mod product;
mod record;
mod review;
mod timestamp;
mod user;

pub use order::{Order, OrderItem};
pub use product::Product;
pub use record::{DomainRecord, Entity, EntityKey, EntityType};
pub use review::Review;
pub use timestamp::Timestamp;
pub use user::{PasswordReset, User, UserRole};
