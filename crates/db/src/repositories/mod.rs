use thiserror::Error;

pub mod party;
pub mod product;
pub mod quote;

pub use party::SqlDirectoryRepository;
pub use product::SqlProductRepository;
pub use quote::{
    DashboardSnapshot, NewQuoteRow, QuoteDetail, QuoteListFilter, SectionDetail,
    SqlQuoteRepository,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}
