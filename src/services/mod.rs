use crate::models::{Error, WorldStatus};

mod collector;
mod worldstatus;

pub use collector::Collector;
pub use worldstatus::WorldStatusClient;

/// Remote source of world status snapshots.
#[allow(async_fn_in_trait)]
pub trait StatusSource {
    /// Format version of the records returned by `world_status`.
    fn version(&self) -> i64;

    async fn world_status(&self) -> Result<Vec<WorldStatus>, Error>;
}
