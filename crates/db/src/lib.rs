pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod service;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{SeedDataset, SeedVerification};
pub use repositories::{
    DashboardSnapshot, QuoteDetail, RepositoryError, SectionDetail, SqlDirectoryRepository,
    SqlProductRepository, SqlQuoteRepository,
};
pub use service::{CreateQuoteInput, QuoteListQuery, QuoteService};
