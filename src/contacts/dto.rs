use axum::{
    async_trait,
    extract::{FromRequest, Multipart, Request},
    http::header::CONTENT_TYPE,
    Json,
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::{macros::format_description, Date};

use crate::{
    auth::dto::normalize_email,
    contacts::repo_types::{ContactPatch, NewContact},
    error::{ApiError, ApiResult},
    images::services::ext_from_mime,
};

const NAME_MAX: usize = 50;
const EMAIL_MAX: usize = 50;
const PHONE_MAX: usize = 20;
const ADDITIONAL_MAX: usize = 200;

/// Request body for creating a contact.
#[derive(Debug, Deserialize, Serialize)]
pub struct ContactCreate {
    pub name: String,
    pub surname: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub birthday: Option<Date>,
    #[serde(default)]
    pub additional_data: Option<String>,
}

/// Partial update; absent fields are left as stored.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ContactUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub surname: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub birthday: Option<Date>,
    #[serde(default)]
    pub additional_data: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub skip: i64,
    #[serde(default = "default_limit")]
    pub limit: i64,
}
fn default_limit() -> i64 {
    100
}

impl Pagination {
    pub fn check(&self) -> ApiResult<()> {
        if self.skip < 0 {
            return Err(ApiError::Validation("skip must not be negative".into()));
        }
        if !(1..=100).contains(&self.limit) {
            return Err(ApiError::Validation("limit must be between 1 and 100".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: String,
}

fn required(field: &str, value: String, max: usize) -> ApiResult<String> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(ApiError::Validation(format!("{field} must not be empty")));
    }
    bounded(field, value, max)
}

fn bounded(field: &str, value: String, max: usize) -> ApiResult<String> {
    if value.chars().count() > max {
        return Err(ApiError::Validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(value)
}

fn contact_email(raw: &str) -> ApiResult<String> {
    bounded("email", normalize_email(raw)?, EMAIL_MAX)
}

impl ContactCreate {
    pub fn validate(self) -> ApiResult<NewContact> {
        Ok(NewContact {
            name: required("name", self.name, NAME_MAX)?,
            surname: required("surname", self.surname, NAME_MAX)?,
            email: contact_email(&self.email)?,
            phone: self.phone.map(|p| bounded("phone", p, PHONE_MAX)).transpose()?,
            birthday: self.birthday,
            additional_data: self
                .additional_data
                .map(|d| bounded("additional_data", d, ADDITIONAL_MAX))
                .transpose()?,
        })
    }
}

impl ContactUpdate {
    pub fn validate(self) -> ApiResult<ContactPatch> {
        Ok(ContactPatch {
            name: self.name.map(|v| required("name", v, NAME_MAX)).transpose()?,
            surname: self
                .surname
                .map(|v| required("surname", v, NAME_MAX))
                .transpose()?,
            email: self.email.as_deref().map(contact_email).transpose()?,
            phone: self.phone.map(|p| bounded("phone", p, PHONE_MAX)).transpose()?,
            birthday: self.birthday,
            additional_data: self
                .additional_data
                .map(|d| bounded("additional_data", d, ADDITIONAL_MAX))
                .transpose()?,
            avatar_url: None,
        })
    }

    /// Fill one field from a multipart text part. Empty parts are ignored.
    fn set(&mut self, field: &str, text: String) -> ApiResult<()> {
        if text.is_empty() {
            return Ok(());
        }
        match field {
            "name" => self.name = Some(text),
            "surname" => self.surname = Some(text),
            "email" => self.email = Some(text),
            "phone" => self.phone = Some(text),
            "additional_data" => self.additional_data = Some(text),
            "birthday" => {
                let date = Date::parse(text.trim(), format_description!("[year]-[month]-[day]"))
                    .map_err(|_| ApiError::Validation("birthday must be YYYY-MM-DD".into()))?;
                self.birthday = Some(date);
            }
            other => return Err(ApiError::Validation(format!("unknown field {other}"))),
        }
        Ok(())
    }
}

/// Image bytes sent with an update.
#[derive(Debug)]
pub struct AvatarUpload {
    pub body: Bytes,
    pub content_type: String,
}

/// Body of `PUT /contacts/{id}`: JSON fields, or multipart fields plus an
/// optional `avatar` file.
#[derive(Debug)]
pub struct ContactUpdateInput {
    pub update: ContactUpdate,
    pub avatar: Option<AvatarUpload>,
}

#[async_trait]
impl<S> FromRequest<S> for ContactUpdateInput
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let multipart = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("multipart/form-data"));

        if !multipart {
            let Json(update) = Json::<ContactUpdate>::from_request(req, state).await?;
            return Ok(Self {
                update,
                avatar: None,
            });
        }

        let mut mp = Multipart::from_request(req, state).await?;
        let mut update = ContactUpdate::default();
        let mut avatar = None;

        while let Some(field) = mp.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name == "avatar" {
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let body = field.bytes().await?;
                if body.is_empty() {
                    continue;
                }
                if ext_from_mime(&content_type).is_none() {
                    return Err(ApiError::Validation(format!(
                        "unsupported avatar type {content_type}"
                    )));
                }
                avatar = Some(AvatarUpload { body, content_type });
            } else {
                let text = field.text().await?;
                update.set(&name, text)?;
            }
        }

        Ok(Self { update, avatar })
    }
}
