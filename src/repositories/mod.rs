//! External stores used by the collaborators.

mod redis_repo;

pub use redis_repo::RedisRepository;
