//! Contact form validation, performed before any booking request

use super::state::ContactForm;
use crate::error::{FieldError, ValidationError};
use regex::Regex;
use std::sync::LazyLock;

const MAX_NAME_LEN: usize = 200;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid"));

/// Contact details that passed validation. Only [`validate_contact`] builds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidContact {
    name: String,
    email: String,
}

impl ValidContact {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

/// Validate the contact form, reporting every rejected field at once
pub fn validate_contact(form: &ContactForm) -> Result<ValidContact, ValidationError> {
    let name = form.name.trim();
    let email = form.email.trim();
    let mut fields = Vec::new();

    if name.is_empty() {
        fields.push(FieldError {
            field: "name",
            message: "Please enter your name".to_string(),
        });
    } else if name.chars().count() > MAX_NAME_LEN {
        fields.push(FieldError {
            field: "name",
            message: format!("Name must be at most {MAX_NAME_LEN} characters"),
        });
    }

    if email.is_empty() {
        fields.push(FieldError {
            field: "email",
            message: "Please enter your email address".to_string(),
        });
    } else if !EMAIL_RE.is_match(email) {
        fields.push(FieldError {
            field: "email",
            message: "Please enter a valid email address".to_string(),
        });
    }

    if !fields.is_empty() {
        return Err(ValidationError { fields });
    }

    Ok(ValidContact {
        name: name.to_string(),
        email: email.to_string(),
    })
}
