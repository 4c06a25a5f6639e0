pub mod config;
pub mod db;
pub mod pricing;
pub mod validation;
