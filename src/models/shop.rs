use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::geo::Coordinates;

pub const SHOP_NAME_MAX_CHARS: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Shop {
    pub id: i64,
    pub name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub contact: Option<String>,
    pub hours: Option<String>,
    pub owner_user_id: i64,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Shop {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates {
            latitude: self.latitude,
            longitude: self.longitude,
        }
    }
}

/// A shop about to be created at a redeemed claim's coordinates.
#[derive(Debug, Clone)]
pub struct NewShop {
    pub name: String,
    pub coordinates: Coordinates,
    pub contact: Option<String>,
    pub hours: Option<String>,
    pub owner_user_id: i64,
}

/// Owner-editable metadata. `None` leaves the field untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShopUpdate {
    pub name: Option<String>,
    pub contact: Option<String>,
    pub hours: Option<String>,
}

impl ShopUpdate {
    pub fn validated(self) -> Result<Self, AppError> {
        Ok(Self {
            name: self.name.as_deref().map(validate_shop_name).transpose()?,
            contact: self.contact.map(|c| c.trim().to_string()),
            hours: self.hours.map(|h| h.trim().to_string()),
        })
    }
}

/// Trim and bound a shop name to 1..=100 characters.
pub fn validate_shop_name(name: &str) -> Result<String, AppError> {
    let trimmed = name.trim();
    let len = trimmed.chars().count();
    if len == 0 || len > SHOP_NAME_MAX_CHARS {
        return Err(AppError::validation(format!(
            "shop name must be 1 to {} characters",
            SHOP_NAME_MAX_CHARS
        )));
    }
    Ok(trimmed.to_string())
}

/// Blank optional text collapses to `None`.
pub fn normalize_optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
