pub mod bedtime;
pub mod bm;
pub mod config;
pub mod embeds;
pub mod error;
pub mod helpers;
pub mod jobs;
pub mod notify;
pub mod sync;
pub mod tasks;
pub mod validation;
