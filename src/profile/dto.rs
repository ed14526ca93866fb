use serde::{Deserialize, Serialize};

use crate::auth::repo_types::User;

#[derive(Debug, Default, Deserialize)]
pub struct UpdateNameRequest {
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateEmailRequest {
    pub email: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

/// Never carries the password hash.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileView {
    pub name: String,
    pub email: String,
    pub profile_photo: String,
}

impl From<User> for ProfileView {
    fn from(u: User) -> Self {
        Self {
            name: u.name,
            email: u.email,
            profile_photo: u.profile_photo,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ProfileResponse {
    pub success: bool,
    pub user: ProfileView,
}

#[derive(Debug, Serialize)]
pub struct NameResponse {
    pub success: bool,
    pub message: &'static str,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct EmailResponse {
    pub success: bool,
    pub message: &'static str,
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct PasswordResponse {
    pub success: bool,
    pub message: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhotoResponse {
    pub success: bool,
    pub message: &'static str,
    pub photo_url: String,
}
