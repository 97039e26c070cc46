pub mod in_memory;
pub mod postgres_escrow_repository;

pub use in_memory::{InMemoryEscrowRepository, InMemoryPayoutAccountRepository};
pub use postgres_escrow_repository::{PostgresEscrowRepository, PostgresPayoutAccountRepository};
