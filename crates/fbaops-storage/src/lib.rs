//! Persistence and HTTP transport for the FBA operations pipeline.

pub mod http;
pub mod memory;
pub mod postgres;
pub mod repo;

pub use http::{
    classify_status, parse_retry_after, BackoffPolicy, FetchError, HttpClientConfig, HttpFetcher,
    RetryDisposition,
};
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use repo::{
    AfnInventoryRepository, AsinRepository, AsinSkuRepository, EanAsinRepository,
    FbaFeeRepository, FeeReferenceRepository, MinimumSellingPriceRepository, RepoResult,
    RepositoryError, SellingPriceHistoryRepository, SkuRepository, Store, Upserted,
};

pub const CRATE_NAME: &str = "fbaops-storage";
