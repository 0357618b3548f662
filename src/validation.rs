use actix_web::HttpResponse;
use serde::Serialize;
use std::collections::BTreeMap;

/// Field-level validation errors accumulated by request handlers and
/// rendered as a 422 response.
#[derive(Debug, Default)]
pub struct ValidationErrors {
    errors: BTreeMap<String, Vec<String>>,
}

#[derive(Serialize)]
struct ValidationErrorBody<'a> {
    message: &'static str,
    errors: &'a BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn new() -> Self {
        ValidationErrors::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn into_response(self) -> HttpResponse {
        HttpResponse::UnprocessableEntity().json(ValidationErrorBody {
            message: "The given data was invalid.",
            errors: &self.errors,
        })
    }
}
