pub mod autopay;
pub mod common;
pub mod errors;
pub mod events;
