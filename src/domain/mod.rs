pub mod command;
pub mod fusion;
pub mod input;
pub mod log_book;
pub mod models;
pub mod settings;
