//! User models matching the frontend ParentUser / SchoolUser interfaces.

use serde::{Deserialize, Serialize};

use super::PickupRequest;

/// Minimum password length accepted at registration.
pub const MIN_PASSWORD_LEN: usize = 6;
/// Minimum school code length accepted at registration.
pub const MIN_SCHOOL_CODE_LEN: usize = 4;
/// Pickup time used when a registration leaves it blank.
pub const DEFAULT_PICKUP_TIME: &str = "15:00";

/// A child registered under a parent account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Child {
    pub id: String,
    pub name: String,
    pub class: String,
    pub default_pickup_time: String,
}

/// A parent account, attached to one school through its code.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParentUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub created_at: String,
    pub username: String,
    pub phone: String,
    pub school_id: String,
    pub school_code: String,
    #[serde(default)]
    pub children: Vec<Child>,
}

/// A school staff account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SchoolUser {
    pub id: String,
    pub email: String,
    pub name: String,
    pub created_at: String,
    pub school_name: String,
    pub school_code: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phone_number: String,
    pub username: String,
}

/// Account role, also used as the `type` discriminator on the wire.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Parent,
    School,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Parent => "parent",
            UserRole::School => "school",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "parent" => Some(UserRole::Parent),
            "school" => Some(UserRole::School),
            _ => None,
        }
    }
}

/// Any stored user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum User {
    Parent(ParentUser),
    School(SchoolUser),
}

impl User {
    pub fn id(&self) -> &str {
        match self {
            User::Parent(p) => &p.id,
            User::School(s) => &s.id,
        }
    }

    pub fn email(&self) -> &str {
        match self {
            User::Parent(p) => &p.email,
            User::School(s) => &s.email,
        }
    }

    pub fn username(&self) -> &str {
        match self {
            User::Parent(p) => &p.username,
            User::School(s) => &s.username,
        }
    }

    pub fn role(&self) -> UserRole {
        match self {
            User::Parent(_) => UserRole::Parent,
            User::School(_) => UserRole::School,
        }
    }
}

/// Child entry in a parent registration form.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildInput {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub default_pickup_time: Option<String>,
}

impl ChildInput {
    fn is_filled(&self) -> bool {
        !self.name.trim().is_empty() && !self.class.trim().is_empty()
    }
}

/// Request body for registering a parent account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterParentRequest {
    pub username: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: String,
    pub password: String,
    pub confirm_password: String,
    pub school_code: String,
    #[serde(default)]
    pub children: Vec<ChildInput>,
}

impl RegisterParentRequest {
    /// Check the form fields that do not need the store.
    pub fn validate(&self) -> Result<(), String> {
        validate_password(&self.password, &self.confirm_password)?;
        if self.username.trim().is_empty() {
            return Err("Username is required".to_string());
        }
        if self.filled_children().next().is_none() {
            return Err("At least one child with name and class is required".to_string());
        }
        Ok(())
    }

    /// Children with both a name and a class; blank rows are dropped.
    pub fn filled_children(&self) -> impl Iterator<Item = &ChildInput> {
        self.children.iter().filter(|c| c.is_filled())
    }
}

/// Request body for registering a school account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterSchoolRequest {
    pub school_name: String,
    pub school_code: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub phone_number: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl RegisterSchoolRequest {
    /// Check the form fields that do not need the store.
    pub fn validate(&self) -> Result<(), String> {
        validate_password(&self.password, &self.confirm_password)?;
        if self.school_name.trim().is_empty() {
            return Err("School name is required".to_string());
        }
        if self.username.trim().is_empty() {
            return Err("Username is required".to_string());
        }
        if !self.school_code.chars().all(|c| c.is_ascii_alphanumeric())
            || self.school_code.is_empty()
        {
            return Err("School code may only contain letters and digits".to_string());
        }
        if self.school_code.len() < MIN_SCHOOL_CODE_LEN {
            return Err(format!(
                "School code must be at least {} characters",
                MIN_SCHOOL_CODE_LEN
            ));
        }
        Ok(())
    }
}

fn validate_password(password: &str, confirm: &str) -> Result<(), String> {
    if password != confirm {
        return Err("Passwords do not match".to_string());
    }
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        ));
    }
    Ok(())
}

/// A parent together with their pickup history at one school.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParentOverview {
    #[serde(flatten)]
    pub parent: ParentUser,
    pub request_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_request: Option<PickupRequest>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn school_form() -> RegisterSchoolRequest {
        RegisterSchoolRequest {
            school_name: "Hanbit Elementary".to_string(),
            school_code: "hanbit01".to_string(),
            address: String::new(),
            phone_number: String::new(),
            username: "hanbit".to_string(),
            email: "office@hanbit.example".to_string(),
            password: "secret1".to_string(),
            confirm_password: "secret1".to_string(),
        }
    }

    #[test]
    fn test_school_form_valid() {
        assert!(school_form().validate().is_ok());
    }

    #[test]
    fn test_school_code_rules() {
        let mut form = school_form();
        form.school_code = "ab-12".to_string();
        assert!(form.validate().is_err());

        form.school_code = "ab1".to_string();
        assert!(form.validate().unwrap_err().contains("at least 4"));
    }

    #[test]
    fn test_password_rules() {
        let mut form = school_form();
        form.confirm_password = "secret2".to_string();
        assert_eq!(form.validate().unwrap_err(), "Passwords do not match");

        form.password = "abc".to_string();
        form.confirm_password = "abc".to_string();
        assert!(form.validate().unwrap_err().contains("at least 6"));
    }

    #[test]
    fn test_parent_form_needs_a_filled_child() {
        let mut form = RegisterParentRequest {
            username: "mom01".to_string(),
            name: "Parent".to_string(),
            email: "parent@example.com".to_string(),
            phone: "010-0000-0000".to_string(),
            password: "secret1".to_string(),
            confirm_password: "secret1".to_string(),
            school_code: "seoul123".to_string(),
            children: vec![ChildInput {
                name: "Mina".to_string(),
                class: "  ".to_string(),
                default_pickup_time: None,
            }],
        };
        assert!(form.validate().is_err());

        form.children.push(ChildInput {
            name: "Joon".to_string(),
            class: "Care 2".to_string(),
            default_pickup_time: None,
        });
        assert!(form.validate().is_ok());
        assert_eq!(form.filled_children().count(), 1);
    }

    #[test]
    fn test_user_type_tag() {
        let user = User::School(SchoolUser {
            id: "s1".to_string(),
            email: "a@b.c".to_string(),
            name: "School".to_string(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
            school_name: "School".to_string(),
            school_code: "code1".to_string(),
            address: String::new(),
            phone_number: String::new(),
            username: "school".to_string(),
        });

        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["type"], "school");
        assert_eq!(value["schoolCode"], "code1");

        let back: User = serde_json::from_value(value).unwrap();
        assert_eq!(back.role(), UserRole::School);
    }
}
