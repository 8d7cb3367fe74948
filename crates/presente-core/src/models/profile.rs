use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A selectable student under the signed-in account.
///
/// Fields the client does not model are kept in `extra`, so a profile
/// written to the credential store reads back unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct Profile {
    #[serde(deserialize_with = "super::de::string_or_number")]
    pub id: String,
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    #[serde(flatten)]
    #[cfg_attr(feature = "ts", ts(skip))]
    pub extra: Map<String, Value>,
}

impl Profile {
    pub fn new(id: impl Into<String>, firstname: impl Into<String>, lastname: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            firstname: firstname.into(),
            lastname: lastname.into(),
            extra: Map::new(),
        }
    }

    pub fn full_name(&self) -> String {
        match (self.firstname.is_empty(), self.lastname.is_empty()) {
            (false, false) => format!("{} {}", self.firstname, self.lastname),
            (false, true) => self.firstname.clone(),
            (true, false) => self.lastname.clone(),
            (true, true) => format!("#{}", self.id),
        }
    }
}
