// src/models/mod.rs

pub mod category;
pub mod task;
pub mod user;
