//! Shared models for the potluck recipe app.

pub mod basic_models;
pub mod filter;
pub mod mealdb;
pub mod planner;
