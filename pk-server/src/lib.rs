//! Server side of the potluck recipe app: accounts, recipe storage, media
//! uploads and the JSON API the app talks to.

pub mod auth;
pub mod book;
pub mod calendar;
pub mod config;
pub mod database;
pub mod errors;
pub mod logging;
pub mod mealdb;
pub mod media;
pub mod models;
pub mod routes;
pub mod storage;
