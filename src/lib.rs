pub mod cli;
pub mod codoon_client;
pub mod config;
pub mod errors;
pub mod export;
pub mod normalize;
pub mod signature;
pub mod sync;
pub mod upload;
