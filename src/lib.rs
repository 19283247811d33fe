pub mod metrics;
pub mod models;
pub mod multicall;
pub mod scanner;
pub mod state;
pub mod tips;
pub mod utils;
