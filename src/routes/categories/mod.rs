pub mod category_handlers;
pub mod category_models;
