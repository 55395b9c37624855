pub mod memory;
pub mod postgres;
pub mod price_source;
pub mod tools;

pub use memory::{InMemoryStore, StoredRecommendations};
pub use postgres::PostgresStore;
pub use price_source::{extract_price, HttpPriceSource, PriceSource};
pub use tools::PriceClaimTool;
