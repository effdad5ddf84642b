pub mod accounts;
pub mod repository;

pub use accounts::Accounts;
pub use repository::Repository;
