//! Repository facades.
//!
//! Controllers depend on these types only. Each facade forwards to the shared
//! [`MigrationRouter`], so the migration phase can change without touching
//! calling code.

mod orders;
mod products;
mod reviews;
mod users;

use std::sync::Arc;

use crate::migration::MigrationRouter;

pub use orders::Orders;
pub use products::Products;
pub use reviews::Reviews;
pub use users::Users;

/// The four facades over one router.
#[derive(Clone)]
pub struct Repositories {
    pub users: Users,
    pub products: Products,
    pub orders: Orders,
    pub reviews: Reviews,
}

impl Repositories {
    pub fn new(router: Arc<MigrationRouter>) -> Self {
        Self {
            users: Users::new(Arc::clone(&router)),
            products: Products::new(Arc::clone(&router)),
            orders: Orders::new(Arc::clone(&router)),
            reviews: Reviews::new(router),
        }
    }
}
