pub mod connect;
pub mod idgen;
pub mod ledger;
pub mod models;
pub mod orders;
pub mod queries;
pub mod settlement;
pub mod withdrawals;
