/// Alert rules, rate limiting and persistence
pub mod alert_manager;
pub mod engine;
pub mod rate_limiter;
pub mod rules;

pub use alert_manager::{truncate_text, AlertManager, MAX_MESSAGE_BYTES};
pub use engine::{AlertCandidate, AlertEngine};
pub use rate_limiter::RateLimiter;
pub use rules::{AlertContext, AlertRule, CriticalHealthRule, RapidMeltRule, VolumeLossRule};
