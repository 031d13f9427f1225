pub use error::Error;
pub use error::RunError;
pub use error::Stage;
pub use history::HistoryRow;
pub use history::Payload;
pub use history::WorldStatus;
pub use settings::Settings;

mod error;
mod history;
pub mod settings;
