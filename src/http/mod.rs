//! HTTP surface: router and route handlers

pub mod routes;

pub use routes::build_router;
