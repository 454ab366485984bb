pub mod account;
pub mod aggregation;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod custody;
pub mod encoding;
pub mod error;
pub mod events;
pub mod operation;
pub mod registrar;
pub mod storage;
pub mod cli;
