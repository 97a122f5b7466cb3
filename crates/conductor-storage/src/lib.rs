mod gateway;
mod status_store;

pub use gateway::{GatewayError, InMemoryGateway, StorageGateway};
pub use status_store::{HistoryRow, StatusRow, StatusStore};
