//! CLI subcommand implementations.

pub mod analysis;
pub mod balance;
pub mod claim;
pub mod payin;
pub mod relations;
pub mod repos;
pub mod settle;
pub mod status;
pub mod users;
pub mod util;
