#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Postal address shared by reference between features.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct Address {
    /// Street name.
    pub street: Option<String>,
    /// House number within the street.
    pub house_number: Option<String>,
    /// Post office box.
    pub po_box: Option<String>,
    /// Postal code.
    pub zip_code: Option<String>,
    /// City or locality.
    pub city: Option<String>,
    /// State or province.
    pub state: Option<String>,
    /// Country.
    pub country: Option<String>,
}

impl Address {
    /// Address with only a street and house number.
    pub fn street(street: impl Into<String>, house_number: impl Into<String>) -> Self {
        Self {
            street: Some(street.into()),
            house_number: Some(house_number.into()),
            ..Self::default()
        }
    }
}
