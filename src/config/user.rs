use crate::attributes::{AttributeRequest, Capabilities, FlagRequest};
use crate::error::ValidationError;
use crate::planner::normalize_names;
use crate::privilege::{parse_privs, PrivilegeRequest};
use serde::{Deserialize, Serialize};

use super::State;

fn default_true() -> bool {
    true
}

/// Desired state of one user (role with login).
///
/// For example:
///
/// ```yaml
/// - type: user
///   name: django
///   password: ceec4eif7ya
///   db: acme
///   priv: "CONNECT/products:ALL"
///   role_attr_flags: CREATEDB,NOSUPERUSER
///   expires: "Jan 31 2030"
///   groups:
///     - readonly
/// ```
///
/// `password` may be plaintext or an md5 hash (`md5` + md5(password || name));
/// an empty string removes the password.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct UserRequest {
    #[serde(alias = "user")]
    pub name: String,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub encrypted: bool,
    #[serde(default, alias = "login_db")]
    pub db: Option<String>,
    #[serde(default, rename = "priv")]
    pub privs: Option<String>,
    #[serde(default)]
    pub role_attr_flags: String,
    #[serde(default)]
    pub expires: Option<String>,
    #[serde(default)]
    pub conn_limit: Option<i32>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub no_password_changes: bool,
    #[serde(default = "default_true", alias = "fail_on_role")]
    pub fail_on_user: bool,
    #[serde(default)]
    pub state: State,
}

/// A user request with every string parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUser {
    pub name: String,
    pub attributes: AttributeRequest,
    pub privileges: PrivilegeRequest,
    pub groups: Vec<String>,
}

impl UserRequest {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            password: None,
            encrypted: true,
            db: None,
            privs: None,
            role_attr_flags: String::new(),
            expires: None,
            conn_limit: None,
            groups: vec![],
            no_password_changes: false,
            fail_on_user: true,
            state: State::Present,
        }
    }

    pub fn validate(&self, capabilities: &Capabilities) -> Result<ValidatedUser, ValidationError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(ValidationError::Empty("user name"));
        }

        // Unencrypted storage is gone since PostgreSQL 10
        if !self.encrypted {
            return Err(ValidationError::UnencryptedPassword);
        }

        let flags = FlagRequest::parse(&self.role_attr_flags, capabilities)?;
        let privileges = match &self.privs {
            Some(privs) => parse_privs(privs, self.db.as_deref())?,
            None => PrivilegeRequest::new(),
        };

        Ok(ValidatedUser {
            name: name.to_string(),
            attributes: AttributeRequest {
                password: self.password.clone(),
                flags,
                expires: self.expires.clone(),
                conn_limit: self.conn_limit,
            },
            privileges,
            groups: normalize_names(&self.groups),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn test_user_request_defaults() {
        let request: UserRequest = serde_yaml::from_str("name: alice").unwrap();
        assert_eq!(request, UserRequest::new("alice"));
    }

    #[test]
    fn test_user_request_aliases() {
        let request: UserRequest = serde_yaml::from_str(indoc! {"
            user: alice
            login_db: acme
            priv: CONNECT
            fail_on_role: false
            state: absent
        "})
        .unwrap();

        assert_eq!(request.name, "alice");
        assert_eq!(request.db.as_deref(), Some("acme"));
        assert_eq!(request.privs.as_deref(), Some("CONNECT"));
        assert!(!request.fail_on_user);
        assert_eq!(request.state, State::Absent);
    }

    #[test]
    fn test_validate_user() {
        let mut request = UserRequest::new(" alice ");
        request.db = Some("acme".to_string());
        request.privs = Some("CONNECT/orders:SELECT".to_string());
        request.role_attr_flags = "CREATEDB".to_string();
        request.groups = vec!["readonly ".to_string(), "readonly".to_string()];

        let user = request.validate(&Capabilities::latest()).unwrap();
        assert_eq!(user.name, "alice");
        assert_eq!(user.privileges.len(), 2);
        assert_eq!(user.attributes.flags.to_clause(), "CREATEDB");
        assert_eq!(user.groups, vec!["readonly".to_string()]);
    }

    #[test]
    fn test_validate_user_errors() {
        let caps = Capabilities::latest();

        let request = UserRequest::new("");
        assert_eq!(
            request.validate(&caps).unwrap_err(),
            ValidationError::Empty("user name")
        );

        let mut request = UserRequest::new("alice");
        request.encrypted = false;
        assert_eq!(
            request.validate(&caps).unwrap_err(),
            ValidationError::UnencryptedPassword
        );

        let mut request = UserRequest::new("alice");
        request.privs = Some("CONNECT".to_string());
        assert_eq!(
            request.validate(&caps).unwrap_err(),
            ValidationError::MissingDatabase
        );

        let mut request = UserRequest::new("alice");
        request.role_attr_flags = "CREATEUSER".to_string();
        assert!(matches!(
            request.validate(&caps).unwrap_err(),
            ValidationError::InvalidFlags(_)
        ));
    }
}
