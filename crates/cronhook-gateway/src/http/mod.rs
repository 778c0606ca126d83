pub mod error;
pub mod health;
pub mod history;
pub mod jobs;
