// src/routes/mod.rs

pub mod auth;
pub mod categories;
pub mod routes;
pub mod tasks;
