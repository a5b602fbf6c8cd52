//! Database layer: pool, session repositories, and the `SessionStore` on PostgreSQL.

mod pool;
mod repositories;
mod store;

pub use pool::{create_lazy_pool, create_pool, run_migrations, DbPool, MIGRATOR};
pub use repositories::*;
pub use store::PgSessionStore;
