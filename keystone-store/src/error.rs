#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unknown database provider `{0}`")]
    UnknownProvider(String),

    #[error("database provider `{0}` is not enabled in this build")]
    ProviderNotEnabled(String),

    #[error("no ambient transaction, the scope was already completed or disposed")]
    NoAmbientTransaction,

    #[error("an inner scope was not completed, the transaction has been rolled back")]
    ScopeAborted,

    #[error("sqlx `{0}`")]
    Sqlx(#[from] sqlx::Error),

    #[error("sea_query `{0}`")]
    SeaQuery(#[from] sea_query::error::Error),

    #[error("{0}")]
    Any(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;
