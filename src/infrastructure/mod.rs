pub mod api_client;
pub mod credential_store;
pub mod error;
pub mod state_store;
