//! HTTP handlers

pub mod auth;
pub mod chatbot;
pub mod health;
pub mod predictions;
pub mod users;
