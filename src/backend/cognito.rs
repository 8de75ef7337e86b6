//! AWS Cognito user pool backend.
//!
//! This module adapts the Cognito admin APIs to [`IdentityBackend`]. The SDK
//! client is built once from the default credential chain (environment,
//! profile, or pod identity) and shared by every reconciliation pass.

use async_trait::async_trait;
use aws_sdk_cognitoidentityprovider::Client;
use aws_sdk_cognitoidentityprovider::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_cognitoidentityprovider::types::{AttributeType, MessageActionType};
use tracing::{debug, info};

use crate::error::{BackendError, ConfigError, OperatorError, Result};

use super::credential::generate_temporary_password;
use super::port::{BackendResult, IdentityBackend};
use super::types::{DesiredUser, ObservedUser, UserPage};

/// Email attribute name.
const ATTR_EMAIL: &str = "email";

/// Email verification attribute name.
const ATTR_EMAIL_VERIFIED: &str = "email_verified";

/// Maximum page size accepted by `ListUsers`.
const MAX_PAGE_SIZE: i32 = 60;

/// Cognito-backed identity backend.
#[derive(Debug, Clone)]
pub struct CognitoBackend {
    /// Cognito client.
    client: Client,
    /// User pool ID.
    user_pool_id: String,
    /// Listing page size.
    page_size: i32,
}

impl CognitoBackend {
    /// Creates a backend for a user pool, loading AWS configuration from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the user pool ID is empty.
    pub async fn new(user_pool_id: &str, region: Option<&str>) -> Result<Self> {
        if user_pool_id.is_empty() {
            return Err(OperatorError::Config(ConfigError::validation(
                "user pool ID cannot be empty",
                "backend.user_pool_id",
            )));
        }

        let loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        let config = if let Some(region_str) = region {
            loader
                .region(aws_config::Region::new(region_str.to_string()))
                .load()
                .await
        } else {
            loader.load().await
        };

        info!("Using Cognito user pool {user_pool_id}");

        Ok(Self::with_client(Client::new(&config), user_pool_id))
    }

    /// Creates a backend with an existing client.
    #[must_use]
    pub fn with_client(client: Client, user_pool_id: &str) -> Self {
        Self {
            client,
            user_pool_id: user_pool_id.to_string(),
            page_size: MAX_PAGE_SIZE,
        }
    }

    /// Sets the listing page size (clamped to 1..=60).
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = i32::try_from(page_size).unwrap_or(MAX_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        self
    }

    /// Builds a string attribute.
    fn attribute(name: &str, value: &str) -> BackendResult<AttributeType> {
        AttributeType::builder()
            .name(name)
            .value(value)
            .build()
            .map_err(|e| BackendError::invalid_argument(format!("invalid attribute {name}: {e}")))
    }

    /// Extracts the email from a list of attributes.
    fn email_of(attributes: &[AttributeType]) -> String {
        attributes
            .iter()
            .find(|a| a.name() == ATTR_EMAIL)
            .and_then(AttributeType::value)
            .unwrap_or_default()
            .to_string()
    }
}

/// Maps an SDK error to a backend error.
fn classify<E>(err: &SdkError<E>, action: &str) -> BackendError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let message = format!("{action}: {}", DisplayErrorContext(err));

    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            BackendError::unavailable(message)
        }
        _ => match err.code() {
            Some("UsernameExistsException" | "AliasExistsException") => {
                BackendError::new(crate::error::ErrorKind::AlreadyExists, message)
            }
            Some("UserNotFoundException") => {
                BackendError::new(crate::error::ErrorKind::NotFound, message)
            }
            Some("InvalidParameterException" | "InvalidPasswordException") => {
                BackendError::invalid_argument(message)
            }
            Some(
                "TooManyRequestsException" | "LimitExceededException" | "InternalErrorException",
            ) => BackendError::unavailable(message),
            _ => BackendError::unknown(message),
        },
    }
}

/// Rejects empty usernames before they reach the API.
fn require_username(username: &str) -> BackendResult<()> {
    if username.is_empty() {
        Err(BackendError::invalid_argument("username cannot be empty"))
    } else {
        Ok(())
    }
}

#[async_trait]
impl IdentityBackend for CognitoBackend {
    async fn create_user(&self, user: &DesiredUser) -> BackendResult<()> {
        require_username(&user.name)?;

        let mut request = self
            .client
            .admin_create_user()
            .user_pool_id(&self.user_pool_id)
            .username(&user.name)
            .user_attributes(Self::attribute(ATTR_EMAIL, &user.email)?)
            .user_attributes(Self::attribute(ATTR_EMAIL_VERIFIED, "true")?)
            .message_action(MessageActionType::Suppress);

        // The account is created enabled; a Disable operation follows in the same pass.
        if !user.enabled {
            request = request.temporary_password(generate_temporary_password());
        }

        request
            .send()
            .await
            .map_err(|e| classify(&e, &format!("create user {}", user.name)))?;

        debug!("Created Cognito user {}", user.name);
        Ok(())
    }

    async fn get_user(&self, username: &str) -> BackendResult<Option<ObservedUser>> {
        require_username(username)?;

        let result = self
            .client
            .admin_get_user()
            .user_pool_id(&self.user_pool_id)
            .username(username)
            .send()
            .await;

        match result {
            Ok(output) => Ok(Some(ObservedUser {
                username: username.to_string(),
                email: Self::email_of(output.user_attributes()),
                enabled: output.enabled(),
            })),
            Err(e) => {
                let err = classify(&e, &format!("get user {username}"));
                if err.is_not_found() { Ok(None) } else { Err(err) }
            }
        }
    }

    async fn update_attributes(&self, user: &DesiredUser) -> BackendResult<()> {
        require_username(&user.name)?;

        self.client
            .admin_update_user_attributes()
            .user_pool_id(&self.user_pool_id)
            .username(&user.name)
            .user_attributes(Self::attribute(ATTR_EMAIL, &user.email)?)
            .send()
            .await
            .map_err(|e| classify(&e, &format!("update attributes for {}", user.name)))?;

        Ok(())
    }

    async fn set_enabled(&self, username: &str, enabled: bool) -> BackendResult<()> {
        require_username(username)?;

        if enabled {
            self.client
                .admin_enable_user()
                .user_pool_id(&self.user_pool_id)
                .username(username)
                .send()
                .await
                .map_err(|e| classify(&e, &format!("enable user {username}")))?;
        } else {
            self.client
                .admin_disable_user()
                .user_pool_id(&self.user_pool_id)
                .username(username)
                .send()
                .await
                .map_err(|e| classify(&e, &format!("disable user {username}")))?;
        }

        Ok(())
    }

    async fn delete_user(&self, username: &str) -> BackendResult<()> {
        require_username(username)?;

        self.client
            .admin_delete_user()
            .user_pool_id(&self.user_pool_id)
            .username(username)
            .send()
            .await
            .map_err(|e| classify(&e, &format!("delete user {username}")))?;

        Ok(())
    }

    async fn list_page(&self, token: Option<String>) -> BackendResult<UserPage> {
        let output = self
            .client
            .list_users()
            .user_pool_id(&self.user_pool_id)
            .limit(self.page_size)
            .set_pagination_token(token)
            .send()
            .await
            .map_err(|e| classify(&e, "list users"))?;

        let users = output
            .users()
            .iter()
            .filter_map(|u| {
                u.username().map(|name| ObservedUser {
                    username: name.to_string(),
                    email: Self::email_of(u.attributes()),
                    enabled: u.enabled(),
                })
            })
            .collect();

        Ok(UserPage::new(users, output.pagination_token().map(String::from)))
    }

    fn backend_type(&self) -> &'static str {
        "cognito"
    }
}
