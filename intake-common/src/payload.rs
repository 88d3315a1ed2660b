//! Per-form payloads
//!
//! Each known form type declares its optional text fields; anything else the
//! form posted is kept in an `extra` map so newer form versions round-trip
//! without losing data. On the wire a payload is `{"form_type", "fields"}`.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Raw field map as posted by a form
pub type Fields = BTreeMap<String, Value>;

/// Kind of form a submission came from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum FormType {
    Contact,
    QuickContact,
    Feedback,
    Inquiry,
    /// Form types this build does not model explicitly
    Other(String),
}

impl FormType {
    pub fn as_str(&self) -> &str {
        match self {
            FormType::Contact => "contact",
            FormType::QuickContact => "quick_contact",
            FormType::Feedback => "feedback",
            FormType::Inquiry => "inquiry",
            FormType::Other(name) => name,
        }
    }
}

impl fmt::Display for FormType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "contact" => Ok(FormType::Contact),
            "quick_contact" => Ok(FormType::QuickContact),
            "feedback" => Ok(FormType::Feedback),
            "inquiry" => Ok(FormType::Inquiry),
            other => {
                let well_formed = other
                    .chars()
                    .next()
                    .map(|c| c.is_ascii_lowercase())
                    .unwrap_or(false)
                    && other
                        .chars()
                        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
                    && other.len() <= 64;
                if well_formed {
                    Ok(FormType::Other(other.to_string()))
                } else {
                    Err(Error::Validation(format!("Malformed form type: '{}'", other)))
                }
            }
        }
    }
}

impl TryFrom<String> for FormType {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<FormType> for String {
    fn from(t: FormType) -> Self {
        t.as_str().to_string()
    }
}

/// Remove `key` from `fields` if it holds a string
fn take_text(fields: &mut Fields, key: &str) -> Option<String> {
    match fields.get(key) {
        Some(Value::String(_)) => match fields.remove(key) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        },
        _ => None,
    }
}

macro_rules! form_fields {
    ($(#[$meta:meta])* $name:ident { $($field:ident),* $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq)]
        pub struct $name {
            $(pub $field: Option<String>,)*
            /// Fields this form type does not declare
            pub extra: Fields,
        }

        impl $name {
            fn from_fields(mut fields: Fields) -> Self {
                Self {
                    $($field: take_text(&mut fields, stringify!($field)),)*
                    extra: fields,
                }
            }

            fn into_fields(self) -> Fields {
                let mut fields = self.extra;
                $(
                    if let Some(v) = self.$field {
                        fields.insert(stringify!($field).to_string(), Value::String(v));
                    }
                )*
                fields
            }

            fn declared_text(&self) -> Vec<&str> {
                [$(self.$field.as_deref(),)*].into_iter().flatten().collect()
            }
        }
    };
}

form_fields!(
    /// Full contact form
    ContactForm { name, email, phone, subject, message }
);

form_fields!(
    /// Short contact widget (name + one way to reach back)
    QuickContactForm { name, email, phone, message }
);

form_fields!(
    /// Site feedback form
    FeedbackForm { name, email, rating, page, message }
);

form_fields!(
    /// Sales / general inquiry form
    InquiryForm { name, email, phone, company, subject, message }
);

/// Payload of a submission, keyed by form type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawPayload", into = "RawPayload")]
pub enum FormPayload {
    Contact(ContactForm),
    QuickContact(QuickContactForm),
    Feedback(FeedbackForm),
    Inquiry(InquiryForm),
    Other { form_type: String, fields: Fields },
}

/// Wire and storage shape of a payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawPayload {
    pub form_type: String,
    #[serde(default)]
    pub fields: Fields,
}

impl FormPayload {
    /// Build a typed payload from a form type name and its posted fields
    pub fn from_parts(form_type: &str, fields: Fields) -> Result<Self> {
        let payload = match form_type.parse::<FormType>()? {
            FormType::Contact => FormPayload::Contact(ContactForm::from_fields(fields)),
            FormType::QuickContact => {
                FormPayload::QuickContact(QuickContactForm::from_fields(fields))
            }
            FormType::Feedback => FormPayload::Feedback(FeedbackForm::from_fields(fields)),
            FormType::Inquiry => FormPayload::Inquiry(InquiryForm::from_fields(fields)),
            FormType::Other(name) => FormPayload::Other {
                form_type: name,
                fields,
            },
        };
        Ok(payload)
    }

    pub fn form_type(&self) -> FormType {
        match self {
            FormPayload::Contact(_) => FormType::Contact,
            FormPayload::QuickContact(_) => FormType::QuickContact,
            FormPayload::Feedback(_) => FormType::Feedback,
            FormPayload::Inquiry(_) => FormType::Inquiry,
            FormPayload::Other { form_type, .. } => FormType::Other(form_type.clone()),
        }
    }

    /// Case-insensitive substring match over every textual field value
    ///
    /// `needle` must already be lowercase.
    pub fn contains_text(&self, needle: &str) -> bool {
        let (declared, extra) = match self {
            FormPayload::Contact(f) => (f.declared_text(), &f.extra),
            FormPayload::QuickContact(f) => (f.declared_text(), &f.extra),
            FormPayload::Feedback(f) => (f.declared_text(), &f.extra),
            FormPayload::Inquiry(f) => (f.declared_text(), &f.extra),
            FormPayload::Other { fields, .. } => (Vec::new(), fields),
        };
        declared
            .into_iter()
            .any(|v| v.to_lowercase().contains(needle))
            || extra.values().any(|v| value_contains(v, needle))
    }
}

fn value_contains(value: &Value, needle: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(needle),
        Value::Number(n) => n.to_string().contains(needle),
        Value::Array(items) => items.iter().any(|v| value_contains(v, needle)),
        _ => false,
    }
}

impl TryFrom<RawPayload> for FormPayload {
    type Error = Error;

    fn try_from(raw: RawPayload) -> Result<Self> {
        FormPayload::from_parts(&raw.form_type, raw.fields)
    }
}

impl From<FormPayload> for RawPayload {
    fn from(payload: FormPayload) -> Self {
        let form_type = payload.form_type().to_string();
        let fields = match payload {
            FormPayload::Contact(f) => f.into_fields(),
            FormPayload::QuickContact(f) => f.into_fields(),
            FormPayload::Feedback(f) => f.into_fields(),
            FormPayload::Inquiry(f) => f.into_fields(),
            FormPayload::Other { fields, .. } => fields,
        };
        RawPayload { form_type, fields }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Fields {
        match value {
            Value::Object(map) => map.into_iter().collect(),
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_known_fields_are_lifted_and_extras_kept() {
        let payload = FormPayload::from_parts(
            "contact",
            fields(json!({
                "name": "Dana",
                "email": "dana@example.org",
                "newsletter": true
            })),
        )
        .unwrap();

        match &payload {
            FormPayload::Contact(f) => {
                assert_eq!(f.name.as_deref(), Some("Dana"));
                assert_eq!(f.email.as_deref(), Some("dana@example.org"));
                assert_eq!(f.extra.get("newsletter"), Some(&json!(true)));
            }
            other => panic!("unexpected payload {:?}", other),
        }
        assert_eq!(payload.form_type(), FormType::Contact);
    }

    #[test]
    fn test_non_string_known_field_stays_in_extra() {
        let payload =
            FormPayload::from_parts("quick_contact", fields(json!({"phone": 5551234}))).unwrap();
        match payload {
            FormPayload::QuickContact(f) => {
                assert!(f.phone.is_none());
                assert_eq!(f.extra.get("phone"), Some(&json!(5551234)));
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_unknown_form_type_is_preserved() {
        let payload =
            FormPayload::from_parts("course_waitlist", fields(json!({"course": "B2"}))).unwrap();
        assert_eq!(
            payload.form_type(),
            FormType::Other("course_waitlist".to_string())
        );
        let raw: RawPayload = payload.into();
        assert_eq!(raw.form_type, "course_waitlist");
        assert_eq!(raw.fields.get("course"), Some(&json!("B2")));
    }

    #[test]
    fn test_malformed_form_type_is_rejected() {
        let err = FormPayload::from_parts("Contact Us!", Fields::new()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_wire_shape() {
        let payload =
            FormPayload::from_parts("feedback", fields(json!({"rating": "5", "page": "/faq"})))
                .unwrap();
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["form_type"], "feedback");
        assert_eq!(value["fields"]["rating"], "5");

        let back: FormPayload = serde_json::from_value(value).unwrap();
        assert_eq!(back, payload);
    }

    #[test]
    fn test_contains_text_searches_declared_and_extra_fields() {
        let payload = FormPayload::from_parts(
            "inquiry",
            fields(json!({"company": "Northwind", "notes": ["Bulk ORDER"]})),
        )
        .unwrap();
        assert!(payload.contains_text("northwind"));
        assert!(payload.contains_text("bulk order"));
        assert!(!payload.contains_text("contoso"));
    }
}
