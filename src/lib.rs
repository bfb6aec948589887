pub mod api;
pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod events;
pub mod payments;
pub mod repository;
pub mod service;
