pub mod capping;
pub mod commission;
pub mod config;
pub mod context;
pub mod error;
pub mod member;
