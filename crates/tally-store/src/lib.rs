pub mod accounts;
pub mod error;

pub use accounts::{Account, AccountRepo, InMemoryAccountRepo, TransferReceipt};
pub use error::StoreError;
