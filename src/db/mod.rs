use crate::models::{Error, Payload};

pub mod connstring;
pub mod history;

pub use history::PgHistoryStore;

/// Append-only store for world status snapshots.
#[allow(async_fn_in_trait)]
pub trait HistoryStore {
    type Insert: InsertStatement;

    async fn prepare_insert(&self) -> Result<Self::Insert, Error>;

    async fn refresh_view(&self) -> Result<(), Error>;
}

#[allow(async_fn_in_trait)]
pub trait InsertStatement {
    /// Runs the insert once; the statement is consumed.
    async fn execute(self, payload: &Payload) -> Result<u64, Error>;
}

pub fn application_name() -> String {
    let hostname = whoami::hostname();
    format!("{}@{}", env!("CARGO_PKG_NAME"), hostname)
}

pub async fn connect(connection_string: &str) -> Result<PgHistoryStore, Error> {
    let settings = connstring::parse(connection_string, &application_name())?;
    PgHistoryStore::connect(settings).await
}
