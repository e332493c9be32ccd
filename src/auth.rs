//! Authentication bridge between Bolt credential schemes and an injected
//! identity store.
//!
//! A HELLO message carries a `scheme` plus `principal` and `credentials`.
//! [`AuthBridge`] maps each scheme onto the [`Authenticator`] the embedding
//! application provides and returns an [`AuthResult`]. What a session may do
//! afterwards follows from its roles alone, see [`AuthResult::has_permission`].
//!
//! # Schemes
//!
//! - `none` (or no scheme): anonymous, only when enabled; viewer role.
//! - `bearer`: a signed token checked by [`Authenticator::validate_token`].
//! - `basic`: username and password checked by [`Authenticator::authenticate`].
//!   Drivers that can only send basic auth may pass a token as the password
//!   with an empty username; such credentials are treated as `bearer`.
use std::{fmt, sync::Arc};

use thiserror::Error;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_EDITOR: &str = "editor";
pub const ROLE_VIEWER: &str = "viewer";

pub const ANONYMOUS_USER: &str = "anonymous";

const MIN_TOKEN_LENGTH: usize = 20;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("anonymous authentication not allowed")]
    AnonymousDisabled,

    #[error("bearer token required")]
    MissingToken,

    #[error("invalid bearer token: {0}")]
    InvalidToken(String),

    #[error("invalid credentials for '{0}'")]
    InvalidCredentials(String),

    #[error("unsupported authentication scheme '{0}' (supported: 'basic', 'bearer', 'none')")]
    UnsupportedScheme(String),
}

/// Something a role may allow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Read,
    Write,
    Create,
    Delete,
    Schema,
    Admin,
    UserManage,
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Permission::Read => "read",
            Permission::Write => "write",
            Permission::Create => "create",
            Permission::Delete => "delete",
            Permission::Schema => "schema",
            Permission::Admin => "admin",
            Permission::UserManage => "user_manage",
        };
        f.write_str(name)
    }
}

/// Permissions granted by a role. Unknown roles grant nothing.
pub fn role_permissions(role: &str) -> &'static [Permission] {
    use Permission::*;

    match role {
        ROLE_ADMIN => &[Read, Write, Create, Delete, Admin, Schema, UserManage],
        ROLE_EDITOR => &[Read, Write, Create, Delete],
        ROLE_VIEWER => &[Read],
        _ => &[],
    }
}

/// Who a session belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResult {
    pub username: String,
    pub roles: Vec<String>,
}

impl AuthResult {
    pub fn new(username: impl Into<String>, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            username: username.into(),
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn anonymous() -> Self {
        Self::new(ANONYMOUS_USER, [ROLE_VIEWER])
    }

    /// The identity given to every connection when no authenticator is set.
    pub fn development() -> Self {
        Self::new(ANONYMOUS_USER, [ROLE_ADMIN])
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.roles
            .iter()
            .any(|role| role_permissions(role).contains(&permission))
    }
}

/// The identity store: password checks and token validation. Shared by every
/// connection, so implementations must be safe to call concurrently.
pub trait Authenticator: Send + Sync {
    /// Checks a username and password.
    fn authenticate(
        &self,
        scheme: &str,
        principal: &str,
        credentials: &str,
    ) -> Result<AuthResult, AuthError>;

    /// Checks a signed token and returns the identity its claims describe.
    fn validate_token(&self, token: &str) -> Result<AuthResult, AuthError>;
}

/// Dispatches HELLO credential schemes to an [`Authenticator`].
#[derive(Clone)]
pub struct AuthBridge {
    authenticator: Arc<dyn Authenticator>,
    allow_anonymous: bool,
}

impl AuthBridge {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            allow_anonymous: false,
        }
    }

    pub fn with_anonymous(mut self, allow: bool) -> Self {
        self.allow_anonymous = allow;
        self
    }

    pub fn authenticate(
        &self,
        scheme: &str,
        principal: &str,
        credentials: &str,
    ) -> Result<AuthResult, AuthError> {
        match scheme {
            "none" | "" => {
                if self.allow_anonymous {
                    Ok(AuthResult::anonymous())
                } else {
                    Err(AuthError::AnonymousDisabled)
                }
            }
            "bearer" => {
                if credentials.is_empty() {
                    return Err(AuthError::MissingToken);
                }
                self.authenticator.validate_token(credentials)
            }
            "basic" if principal.is_empty() && looks_like_token(credentials) => {
                self.authenticator.validate_token(credentials)
            }
            "basic" => self
                .authenticator
                .authenticate(scheme, principal, credentials),
            other => Err(AuthError::UnsupportedScheme(other.to_string())),
        }
    }
}

/// Signed tokens are three dot separated segments.
fn looks_like_token(s: &str) -> bool {
    s.len() >= MIN_TOKEN_LENGTH && s.matches('.').count() == 2
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    const TOKEN: &str = "eyJhbGciOi.eyJzdWIiOiJib2IifQ.c2lnbmF0dXJl";

    /// Accepts admin/admin and the token above; records every call.
    #[derive(Default)]
    struct Store {
        calls: Mutex<Vec<String>>,
    }

    impl Authenticator for Store {
        fn authenticate(&self, _: &str, principal: &str, credentials: &str) -> Result<AuthResult, AuthError> {
            self.calls.lock().unwrap().push(format!("password:{principal}"));
            if principal == "admin" && credentials == "admin" {
                Ok(AuthResult::new("admin", [ROLE_ADMIN]))
            } else {
                Err(AuthError::InvalidCredentials(principal.to_string()))
            }
        }

        fn validate_token(&self, token: &str) -> Result<AuthResult, AuthError> {
            self.calls.lock().unwrap().push("token".into());
            if token == TOKEN {
                Ok(AuthResult::new("bob", [ROLE_EDITOR]))
            } else {
                Err(AuthError::InvalidToken("bad signature".into()))
            }
        }
    }

    fn bridge() -> (Arc<Store>, AuthBridge) {
        let store = Arc::new(Store::default());
        (store.clone(), AuthBridge::new(store))
    }

    #[test]
    fn basic_scheme_checks_password() {
        let (store, bridge) = bridge();
        let result = bridge.authenticate("basic", "admin", "admin").unwrap();
        assert_eq!(result.username, "admin");
        assert!(result.has_role(ROLE_ADMIN));
        assert_eq!(*store.calls.lock().unwrap(), vec!["password:admin".to_string()]);

        assert_eq!(
            bridge.authenticate("basic", "admin", "nope"),
            Err(AuthError::InvalidCredentials("admin".into()))
        );
    }

    #[test]
    fn basic_with_empty_principal_and_token_is_bearer() {
        let (store, bridge) = bridge();
        let result = bridge.authenticate("basic", "", TOKEN).unwrap();
        assert_eq!(result.username, "bob");
        assert_eq!(*store.calls.lock().unwrap(), vec!["token".to_string()]);
    }

    #[test]
    fn short_dotted_password_is_not_a_token() {
        let (store, bridge) = bridge();
        assert!(bridge.authenticate("basic", "", "a.b.c").is_err());
        assert_eq!(*store.calls.lock().unwrap(), vec!["password:".to_string()]);
    }

    #[test]
    fn bearer_scheme() {
        let (_, bridge) = bridge();
        assert_eq!(bridge.authenticate("bearer", "", TOKEN).unwrap().username, "bob");
        assert_eq!(bridge.authenticate("bearer", "", ""), Err(AuthError::MissingToken));
        assert!(matches!(
            bridge.authenticate("bearer", "", "x.y.zzzzzzzzzzzzzzzzzzzz"),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn anonymous_requires_opt_in() {
        let (_, bridge) = bridge();
        assert_eq!(bridge.authenticate("none", "", ""), Err(AuthError::AnonymousDisabled));

        let bridge = bridge.with_anonymous(true);
        let result = bridge.authenticate("", "", "").unwrap();
        assert_eq!(result, AuthResult::anonymous());
        assert!(result.has_permission(Permission::Read));
        assert!(!result.has_permission(Permission::Write));
    }

    #[test]
    #[should_panic(expected = "UnsupportedScheme")]
    fn unknown_scheme() {
        let (_, bridge) = bridge();
        bridge.authenticate("kerberos", "a", "b").unwrap();
    }

    #[test]
    fn role_permission_table() {
        let admin = AuthResult::new("a", [ROLE_ADMIN]);
        let editor = AuthResult::new("e", [ROLE_EDITOR]);
        let viewer = AuthResult::new("v", [ROLE_VIEWER]);
        let nobody = AuthResult::new("n", ["guest"]);

        assert!(admin.has_permission(Permission::Schema));
        assert!(admin.has_permission(Permission::UserManage));
        assert!(editor.has_permission(Permission::Write));
        assert!(editor.has_permission(Permission::Delete));
        assert!(!editor.has_permission(Permission::Schema));
        assert!(viewer.has_permission(Permission::Read));
        assert!(!viewer.has_permission(Permission::Create));
        assert!(!nobody.has_permission(Permission::Read));
    }

    #[test]
    fn permissions_union_across_roles() {
        let mixed = AuthResult::new("m", ["guest", ROLE_VIEWER, ROLE_EDITOR]);
        assert!(mixed.has_permission(Permission::Write));
        assert!(!mixed.has_permission(Permission::Admin));
    }
}
