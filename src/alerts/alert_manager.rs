use crate::alerts::engine::{AlertCandidate, AlertEngine};
use crate::alerts::rules::AlertContext;
use crate::alerts::RateLimiter;
use crate::error::AlertError;
use crate::health::HealthAssessment;
use crate::records::{Alert, Glacier, Measurement};
use crate::store::GlacierRepository;
use log::{info, warn};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Longest alert message stored, in bytes
pub const MAX_MESSAGE_BYTES: usize = 512;

/// Turns rule hits into persisted alerts
///
/// Candidates from the [`AlertEngine`] pass through a per glacier and alert
/// type [`RateLimiter`]; survivors are truncated and written to the
/// repository.
pub struct AlertManager {
    engine: AlertEngine,
    rate_limiter: Mutex<RateLimiter>,
    repository: Arc<dyn GlacierRepository>,
}

impl AlertManager {
    pub fn new(
        engine: AlertEngine,
        rate_limiter: RateLimiter,
        repository: Arc<dyn GlacierRepository>,
    ) -> Self {
        Self {
            engine,
            rate_limiter: Mutex::new(rate_limiter),
            repository,
        }
    }

    pub fn engine(&self) -> &AlertEngine {
        &self.engine
    }

    /// Evaluate one glacier and persist the alerts that are not rate limited
    ///
    /// A send counts toward the rate limit only once its alert is written.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::Store` if writing an alert fails. Alerts written
    /// before the failure stay written.
    pub async fn process(
        &self,
        glacier: &Glacier,
        measurements: &[Measurement],
        assessment: HealthAssessment,
    ) -> Result<Vec<Alert>, AlertError> {
        let context = AlertContext::new(glacier, measurements, assessment);
        let candidates = self.admit(self.engine.evaluate(&context));

        let mut created = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let key = candidate.key();
            let mut new_alert = candidate.into_new_alert();
            new_alert.alert_message = truncate_text(&new_alert.alert_message, MAX_MESSAGE_BYTES);

            let alert = self.repository.create_alert(&new_alert).await?;
            self.limiter().record(&key);
            info!(
                "Raised {} alert for {}: {}",
                alert.alert_type, alert.glacier_name, alert.alert_message
            );
            created.push(alert);
        }

        Ok(created)
    }

    fn limiter(&self) -> MutexGuard<'_, RateLimiter> {
        self.rate_limiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Drop candidates that exceed their rate limit
    fn admit(&self, candidates: Vec<AlertCandidate>) -> Vec<AlertCandidate> {
        let mut limiter = self.limiter();

        candidates
            .into_iter()
            .filter(|candidate| {
                let allowed = limiter.can_send(&candidate.key());
                if !allowed {
                    warn!(
                        "Rate limited {} alert for {}",
                        candidate.alert_type, candidate.glacier_name
                    );
                }
                allowed
            })
            .collect()
    }
}

/// Truncate text to at most `max_length` bytes on a UTF-8 boundary
///
/// Truncated text ends with "...", which counts toward the limit.
pub fn truncate_text(text: &str, max_length: usize) -> String {
    if text.len() <= max_length {
        return text.to_string();
    }

    let mut truncate_at = max_length.saturating_sub(3);
    while truncate_at > 0 && !text.is_char_boundary(truncate_at) {
        truncate_at -= 1;
    }

    format!("{}...", &text[..truncate_at])
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use quickcheck_macros::quickcheck;

    #[quickcheck]
    fn prop_truncate_respects_limit_and_boundaries(text: String, limit: u8) -> bool {
        let limit = limit as usize + 3;
        let truncated = truncate_text(&text, limit);
        truncated.len() <= limit
            && (truncated == text || truncated.ends_with("..."))
            && text.starts_with(truncated.trim_end_matches("..."))
    }
}
