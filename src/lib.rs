// Library exports for tutorlink
// Integration tests and the binary build on these modules

pub mod config;
pub mod db;
pub mod error;
pub mod extractors;
pub mod notifications;
pub mod reminders;
pub mod reviews;
pub mod routes;
pub mod state;
