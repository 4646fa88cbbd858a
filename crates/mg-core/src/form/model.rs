//! Form data model and the surface the guard drives.
//!
//! [`FormSurface`] is what the presentation layer implements for a real form:
//! it hands over the fields, lets the guard disable and relabel the submit
//! control, focus a field, and reset the form. [`MemoryForm`] is a plain
//! in-memory implementation used by the CLI and tests.

use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::security::input::FieldType;

/// Stable identity for a form instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormId(String);

impl FormId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// A fresh random id for forms that don't carry one.
    pub fn generate() -> Self {
        Self(format!("form-{}", Uuid::new_v4()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Input types that never carry user data.
const CONTROL_TYPES: &[&str] = &["submit", "button", "reset", "image"];

/// One submitted field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormField {
    pub name: String,
    /// Declared input type (`email`, `tel`, `text`, `textarea`, ...).
    #[serde(rename = "type")]
    pub input_type: String,
    /// Usually a string; anything else sanitizes to empty.
    pub value: serde_json::Value,
    pub required: bool,
    pub classes: Vec<String>,
}

impl Default for FormField {
    fn default() -> Self {
        Self {
            name: String::new(),
            input_type: "text".to_string(),
            value: serde_json::Value::String(String::new()),
            required: false,
            classes: Vec::new(),
        }
    }
}

impl FormField {
    pub fn new(name: impl Into<String>, input_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            input_type: input_type.into(),
            value: serde_json::Value::String(value.into()),
            ..Self::default()
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_class(mut self, class: impl Into<String>) -> Self {
        self.classes.push(class.into());
        self
    }

    /// The value as text, trimmed; empty for non-string values.
    pub fn text(&self) -> &str {
        self.value.as_str().map(str::trim).unwrap_or("")
    }

    pub fn is_control(&self) -> bool {
        CONTROL_TYPES.contains(&self.input_type.to_ascii_lowercase().as_str())
    }

    /// Pick the sanitizer and validator for this field from its type and name.
    pub fn field_type(&self) -> FieldType {
        let ty = self.input_type.to_ascii_lowercase();
        let name = self.name.to_ascii_lowercase();

        if ty == "email" || name.contains("email") {
            FieldType::Email
        } else if ty == "tel" || name.contains("phone") || name.contains("mobile") {
            FieldType::Phone
        } else if name.contains("name") {
            FieldType::Name
        } else if ty == "textarea"
            || name.contains("message")
            || name.contains("msg")
            || name.contains("comment")
        {
            FieldType::Message
        } else {
            FieldType::Text
        }
    }
}

/// The form the guard is processing.
pub trait FormSurface: Send + Sync {
    fn id(&self) -> FormId;
    fn fields(&self) -> Vec<FormField>;
    /// Current label of the submit control.
    fn submit_label(&self) -> String;
    fn set_submit_control(&self, enabled: bool, label: &str);
    fn focus_field(&self, name: &str);
    /// Restore every field to its initial value.
    fn reset(&self);
}

/// Serialized form description, as read by the CLI.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FormDocument {
    pub id: Option<String>,
    pub submit_label: Option<String>,
    pub fields: Vec<FormField>,
}

#[derive(Debug)]
struct MemoryFormState {
    fields: Vec<FormField>,
    submit_enabled: bool,
    submit_label: String,
    focused: Option<String>,
    resets: usize,
    control_history: Vec<(bool, String)>,
}

/// In-memory [`FormSurface`] that records what the guard did to it.
#[derive(Debug)]
pub struct MemoryForm {
    id: FormId,
    initial: Vec<FormField>,
    state: Mutex<MemoryFormState>,
}

pub const DEFAULT_SUBMIT_LABEL: &str = "إرسال";

impl MemoryForm {
    pub fn new(id: FormId, fields: Vec<FormField>) -> Self {
        Self {
            id,
            initial: fields.clone(),
            state: Mutex::new(MemoryFormState {
                fields,
                submit_enabled: true,
                submit_label: DEFAULT_SUBMIT_LABEL.to_string(),
                focused: None,
                resets: 0,
                control_history: Vec::new(),
            }),
        }
    }

    pub fn from_document(doc: FormDocument) -> Self {
        let id = doc.id.map(FormId::new).unwrap_or_else(FormId::generate);
        let form = Self::new(id, doc.fields);
        if let Some(label) = doc.submit_label {
            form.lock().submit_label = label;
        }
        form
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryFormState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Simulate the visitor typing into `name`. Returns false if no such field.
    pub fn set_value(&self, name: &str, value: impl Into<String>) -> bool {
        let mut state = self.lock();
        match state.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => {
                field.value = serde_json::Value::String(value.into());
                true
            }
            None => false,
        }
    }

    pub fn is_submit_enabled(&self) -> bool {
        self.lock().submit_enabled
    }

    pub fn focused_field(&self) -> Option<String> {
        self.lock().focused.clone()
    }

    pub fn reset_count(&self) -> usize {
        self.lock().resets
    }

    /// Every `(enabled, label)` pair the submit control was set to, in order.
    pub fn control_history(&self) -> Vec<(bool, String)> {
        self.lock().control_history.clone()
    }
}

impl FormSurface for MemoryForm {
    fn id(&self) -> FormId {
        self.id.clone()
    }

    fn fields(&self) -> Vec<FormField> {
        self.lock().fields.clone()
    }

    fn submit_label(&self) -> String {
        self.lock().submit_label.clone()
    }

    fn set_submit_control(&self, enabled: bool, label: &str) {
        let mut state = self.lock();
        state.submit_enabled = enabled;
        state.submit_label = label.to_string();
        state.control_history.push((enabled, label.to_string()));
    }

    fn focus_field(&self, name: &str) {
        self.lock().focused = Some(name.to_string());
    }

    fn reset(&self) {
        let mut state = self.lock();
        state.fields = self.initial.clone();
        state.resets += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_classification() {
        assert_eq!(FormField::new("contact", "email", "").field_type(), FieldType::Email);
        assert_eq!(FormField::new("user_email", "text", "").field_type(), FieldType::Email);
        assert_eq!(FormField::new("x", "tel", "").field_type(), FieldType::Phone);
        assert_eq!(FormField::new("mobile", "text", "").field_type(), FieldType::Phone);
        assert_eq!(FormField::new("full_name", "text", "").field_type(), FieldType::Name);
        assert_eq!(FormField::new("body", "textarea", "").field_type(), FieldType::Message);
        assert_eq!(FormField::new("message", "text", "").field_type(), FieldType::Message);
        assert_eq!(FormField::new("shop", "text", "").field_type(), FieldType::Text);
    }

    #[test]
    fn test_text_of_non_string_is_empty() {
        let mut field = FormField::new("n", "number", "");
        field.value = serde_json::json!(12);
        assert_eq!(field.text(), "");
        assert_eq!(FormField::new("n", "text", "  hi ").text(), "hi");
    }

    #[test]
    fn test_control_fields() {
        assert!(FormField::new("go", "submit", "Send").is_control());
        assert!(!FormField::new("go", "text", "").is_control());
    }

    #[test]
    fn test_memory_form_reset_restores_initial() {
        let form = MemoryForm::new(FormId::new("f"), vec![FormField::new("name", "text", "")]);
        assert!(form.set_value("name", "Ali"));
        assert!(!form.set_value("missing", "x"));
        assert_eq!(form.fields()[0].text(), "Ali");
        form.reset();
        assert_eq!(form.fields()[0].text(), "");
        assert_eq!(form.reset_count(), 1);
    }

    #[test]
    fn test_form_document_parse() {
        let doc: FormDocument = serde_json::from_str(
            r#"{"id": "contact", "fields": [
                {"name": "email", "type": "email", "value": "a@b.iq", "required": true},
                {"name": "website", "classes": ["hp-field"]}
            ]}"#,
        )
        .unwrap();
        let form = MemoryForm::from_document(doc);
        assert_eq!(form.id().as_str(), "contact");
        let fields = form.fields();
        assert!(fields[0].required);
        assert_eq!(fields[1].input_type, "text");
        assert_eq!(form.submit_label(), DEFAULT_SUBMIT_LABEL);
    }

    #[test]
    fn test_generated_ids_differ() {
        assert_ne!(FormId::generate(), FormId::generate());
    }
}
