use crate::model::Id;
use serde::{
    Deserialize, Deserializer, Serialize,
    de::{Error, Unexpected},
};
use std::fmt::{Debug, Display, Formatter};
use thiserror::Error;

#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash)]
pub struct UserMarker;

#[derive(Clone, Eq, PartialEq, Debug, Hash, Deserialize, Serialize)]
pub struct User {
    pub id: Id<UserMarker>,
    pub username: Username,
}

/// Any non-empty name. Length and character rules are up to the server.
#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash, Serialize)]
#[serde(transparent)]
pub struct Username(String);

/// Username and password, as submitted to sign up or log in.
#[derive(Clone, Eq, PartialEq, Hash)]
pub struct Login {
    pub username: Username,
    pub password: String,
}

#[derive(Clone, Eq, PartialEq, Hash)]
pub struct PasswordReset {
    pub username: Username,
    pub code: String,
    pub new_password: String,
}

#[derive(Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Default, Hash, Error)]
#[error("The username is invalid: {0:?}")]
pub struct InvalidUsernameError(String);

impl Username {
    pub fn new(username: String) -> Result<Self, InvalidUsernameError> {
        if !username.is_empty() {
            Ok(Username(username))
        } else {
            Err(InvalidUsernameError(username))
        }
    }

    #[must_use]
    pub fn get(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl Display for Username {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Debug for Login {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Login")
            .field("username", &self.username)
            .field("password", &"[redacted]")
            .finish()
    }
}

impl Debug for PasswordReset {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordReset")
            .field("username", &self.username)
            .field("code", &"[redacted]")
            .field("new_password", &"[redacted]")
            .finish()
    }
}

impl<'de> Deserialize<'de> for Username {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let inner = String::deserialize(deserializer)?;
        Username::new(inner)
            .map_err(|err| Error::invalid_value(Unexpected::Str(&err.0), &"Username"))
    }
}

#[cfg(test)]
mod tests {
    use crate::model::user::{Login, User, Username};
    use serde_json::json;

    #[test]
    fn username_must_not_be_empty() {
        assert!(Username::new(String::new()).is_err());
        assert!(Username::new("a".to_owned()).is_ok());
    }

    #[test]
    fn long_usernames_are_accepted() {
        let name = "a".repeat(300);
        assert_eq!(Username::new(name.clone()).unwrap().get(), name);

        let user: User = serde_json::from_value(json!({ "id": 4, "username": name })).unwrap();
        assert_eq!(user.username.get().len(), 300);

        assert!(serde_json::from_value::<User>(json!({ "id": 4, "username": "" })).is_err());
    }

    #[test]
    fn login_debug_hides_password() {
        let login = Login {
            username: Username::new("ada".to_owned()).unwrap(),
            password: "hunter2".to_owned(),
        };

        assert!(!format!("{login:?}").contains("hunter2"));
    }
}
