use serde::{Deserialize, Serialize};

/// The subset of the user profile the walking estimates depend on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub user_id: String,
    #[serde(default, rename = "weight")]
    pub weight_kg: Option<f64>,
    #[serde(default, rename = "height")]
    pub height_cm: Option<f64>,
    #[serde(default)]
    pub default_walking_speed: Option<f64>,
}
