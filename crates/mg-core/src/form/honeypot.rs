//! Decoy-field detection.
//!
//! The form carries fields hidden from people (off-screen, `aria-hidden`,
//! `tabindex=-1`). Naive form-fillers populate every input they find, so a
//! non-empty decoy is a strong automation signal.

use super::model::FormField;
use crate::config::GuardConfig;

/// Which fields count as decoys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoneypotRules {
    names: Vec<String>,
    class: String,
}

impl HoneypotRules {
    pub fn new(names: Vec<String>, class: impl Into<String>) -> Self {
        Self {
            names: names.into_iter().map(|n| n.to_ascii_lowercase()).collect(),
            class: class.into(),
        }
    }

    pub fn from_config(config: &GuardConfig) -> Self {
        Self::new(config.honeypot_names.clone(), config.honeypot_class.clone())
    }

    pub fn is_decoy(&self, field: &FormField) -> bool {
        let name = field.name.to_ascii_lowercase();
        self.names.iter().any(|n| *n == name) || field.classes.iter().any(|c| *c == self.class)
    }

    /// True if any decoy field carries a value.
    pub fn is_tripped(&self, fields: &[FormField]) -> bool {
        self.tripped_field(fields).is_some()
    }

    /// Name of the first decoy field that carries a value.
    pub fn tripped_field<'a>(&self, fields: &'a [FormField]) -> Option<&'a str> {
        fields
            .iter()
            .find(|f| self.is_decoy(f) && !f.text().is_empty())
            .map(|f| f.name.as_str())
    }
}

impl Default for HoneypotRules {
    fn default() -> Self {
        Self::from_config(&GuardConfig::default())
    }
}
