pub mod auth;
pub mod rest;
pub mod ws;

pub use rest::router;
