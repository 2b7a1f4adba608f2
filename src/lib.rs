pub mod allocation;
pub mod appraisal;
pub mod calendar;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod exchange_rate;
pub mod format;
pub mod holdings;
pub mod pipeline;
pub mod present;
pub mod report;
pub mod sources;
