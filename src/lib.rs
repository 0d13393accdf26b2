// src/lib.rs

//! Locator inference and crawl sessions for job-listing pages.

pub mod driver;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
