//! School model.

use serde::{Deserialize, Serialize};

/// A school parents can join through its code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct School {
    pub id: String,
    pub name: String,
    pub code: String,
}

/// Request body for adding a school.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSchoolRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub code: String,
}

/// Schools available before any have been registered.
pub fn default_schools() -> Vec<School> {
    [
        ("1", "Seoul Elementary School", "seoul123"),
        ("2", "Busan Elementary School", "busan456"),
        ("3", "Daegu Elementary School", "daegu789"),
    ]
    .into_iter()
    .map(|(id, name, code)| School {
        id: id.to_string(),
        name: name.to_string(),
        code: code.to_string(),
    })
    .collect()
}
