pub mod config;
pub mod error;
pub mod history;
pub mod model;
pub mod pages;
pub mod routes;
pub mod telemetry;
pub mod upload;
