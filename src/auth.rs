use std::sync::Arc;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};

use crate::identity::IdentityProvider;

/// Shared-password login. The user name must also map to a known identity,
/// so a connection that gets past startup always has an actor.
pub struct SlotkeepAuthSource {
    password: String,
    identity: Arc<dyn IdentityProvider>,
}

impl std::fmt::Debug for SlotkeepAuthSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotkeepAuthSource").finish_non_exhaustive()
    }
}

impl SlotkeepAuthSource {
    pub fn new(password: String, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { password, identity }
    }
}

#[async_trait]
impl AuthSource for SlotkeepAuthSource {
    async fn get_password(&self, login: &LoginInfo) -> PgWireResult<Password> {
        let user = login.user().unwrap_or_default();
        if let Err(e) = self.identity.identify(user) {
            metrics::counter!(crate::observability::AUTH_FAILURES_TOTAL).increment(1);
            tracing::debug!("login refused for {user:?}: {e}");
            return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                "FATAL".into(),
                "28000".into(),
                format!("UNAUTHORIZED: {e}"),
            ))));
        }
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
