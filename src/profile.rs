use std::sync::Arc;

use serde_json::Value;
use tracing::info;

use crate::error::ClientError;
use crate::gateway::{endpoint, HttpGateway};
use crate::models::{ChangePasswordRequest, Profile, UpdateEmailRequest};

pub const LOAD_FAILED: &str = "Failed to load profile";
pub const EMAIL_FAILED: &str = "Failed to update email";
pub const PASSWORD_FAILED: &str = "Failed to change password";

/// Account details of the logged-in user, served by the auth service.
pub struct ProfileClient {
    gateway: Arc<HttpGateway>,
    auth_url: String,
}

impl ProfileClient {
    pub fn new(gateway: Arc<HttpGateway>, auth_url: impl Into<String>) -> Self {
        ProfileClient {
            gateway,
            auth_url: auth_url.into(),
        }
    }

    pub async fn fetch(&self) -> Result<Profile, ClientError> {
        let body = self.gateway.get(endpoint(&self.auth_url, "me")?).await?;
        let field = |name: &str| body.get(name).and_then(Value::as_str).map(str::to_string);

        Ok(Profile {
            username: field("username").or_else(|| field("sub")).unwrap_or_default(),
            email: field("email").unwrap_or_default(),
        })
    }

    pub async fn update_email(&self, new_email: &str) -> Result<(), ClientError> {
        let new_email = new_email.trim();
        if new_email.is_empty() {
            return Err(ClientError::Validation("Email is required".into()));
        }

        let request = UpdateEmailRequest {
            new_email: new_email.to_string(),
        };
        self.gateway
            .put(endpoint(&self.auth_url, "update-email")?, &request)
            .await?;
        info!("Updated email");
        Ok(())
    }

    pub async fn change_password(
        &self,
        old_password: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<(), ClientError> {
        if old_password.is_empty() || new_password.is_empty() {
            return Err(ClientError::Validation(
                "Please fill all password fields".into(),
            ));
        }
        if new_password != confirm_password {
            return Err(ClientError::Validation(
                "New password and confirmation do not match".into(),
            ));
        }

        let request = ChangePasswordRequest {
            old_password: old_password.to_string(),
            new_password: new_password.to_string(),
        };
        self.gateway
            .put(endpoint(&self.auth_url, "change-password")?, &request)
            .await?;
        info!("Changed password");
        Ok(())
    }
}
