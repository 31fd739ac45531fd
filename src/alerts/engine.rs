use crate::alerts::rules::{AlertContext, AlertRule, CriticalHealthRule, RapidMeltRule, VolumeLossRule};
use crate::records::{AlertType, NewAlert, Severity, Timestamp};
use chrono::Utc;
use log::debug;
use serde::{Deserialize, Serialize};

/// Engine for evaluating alert rules against one glacier at a time
pub struct AlertEngine {
    rules: Vec<Box<dyn AlertRule>>,
}

/// An alert some rule wants to raise, before rate limiting and persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertCandidate {
    pub created_at: Timestamp,
    pub glacier_id: String,
    pub glacier_name: String,
    pub alert_type: AlertType,
    pub severity: Severity,
    pub message: String,
    /// Name of the rule that fired
    pub triggered_by: String,
}

impl AlertCandidate {
    /// Rate limiting key: one budget per glacier and alert type
    pub fn key(&self) -> String {
        format!("{}:{}", self.glacier_id, self.alert_type)
    }

    pub fn into_new_alert(self) -> NewAlert {
        NewAlert {
            glacier_id: self.glacier_id,
            glacier_name: self.glacier_name,
            alert_type: self.alert_type,
            alert_message: self.message,
            severity: self.severity,
        }
    }
}

impl Default for AlertEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl AlertEngine {
    /// Create an engine with no rules
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    /// Engine with the three built-in rules
    pub fn with_thresholds(rapid_melt_pct: f64, volume_loss_pct: f64) -> Self {
        let mut engine = Self::new();
        engine.add_rule(Box::new(RapidMeltRule::new(rapid_melt_pct, Severity::Warning)));
        engine.add_rule(Box::new(VolumeLossRule::new(volume_loss_pct, Severity::Warning)));
        engine.add_rule(Box::new(CriticalHealthRule));
        engine
    }

    pub fn add_rule(&mut self, rule: Box<dyn AlertRule>) {
        self.rules.push(rule);
    }

    /// Evaluate all rules and return a candidate for each one that fires
    pub fn evaluate(&self, context: &AlertContext<'_>) -> Vec<AlertCandidate> {
        let mut candidates = Vec::new();

        for rule in &self.rules {
            if let Some(message) = rule.evaluate(context) {
                debug!("Rule '{}' fired for {}", rule.name(), context.glacier.name);
                candidates.push(AlertCandidate {
                    created_at: Utc::now(),
                    glacier_id: context.glacier.id.clone(),
                    glacier_name: context.glacier.name.clone(),
                    alert_type: rule.alert_type(),
                    severity: rule.severity(),
                    message,
                    triggered_by: rule.name().to_string(),
                });
            }
        }

        candidates
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}
