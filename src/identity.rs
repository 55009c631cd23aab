use ulid::Ulid;

/// Who is calling. Established once per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    Client(Ulid),
    Professional(Ulid),
    Admin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    /// No usable identity at all.
    Unauthenticated,
    /// Identity is known but has the wrong role for the operation.
    WrongRole(&'static str),
}

impl std::fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthFailure::Unauthenticated => write!(f, "not authenticated"),
            AuthFailure::WrongRole(role) => write!(f, "requires a {role} identity"),
        }
    }
}

impl std::error::Error for AuthFailure {}

impl Actor {
    pub fn require_client(&self) -> Result<Ulid, AuthFailure> {
        match self {
            Actor::Client(id) => Ok(*id),
            _ => Err(AuthFailure::WrongRole("client")),
        }
    }

    pub fn require_pro(&self) -> Result<Ulid, AuthFailure> {
        match self {
            Actor::Professional(id) => Ok(*id),
            _ => Err(AuthFailure::WrongRole("professional")),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Actor::Client(_) => "client",
            Actor::Professional(_) => "pro",
            Actor::Admin => "admin",
        }
    }
}

pub trait IdentityProvider: Send + Sync {
    fn identify(&self, user: &str) -> Result<Actor, AuthFailure>;
}

/// Reads the role and id straight from the connection's user name:
/// `client:<ulid>`, `pro:<ulid>`, or `admin`.
pub struct UserNameIdentity;

impl IdentityProvider for UserNameIdentity {
    fn identify(&self, user: &str) -> Result<Actor, AuthFailure> {
        let user = user.trim();
        if user == "admin" {
            return Ok(Actor::Admin);
        }
        let (role, id) = user.split_once(':').ok_or(AuthFailure::Unauthenticated)?;
        let id = Ulid::from_string(id.trim()).map_err(|_| AuthFailure::Unauthenticated)?;
        match role {
            "client" => Ok(Actor::Client(id)),
            "pro" => Ok(Actor::Professional(id)),
            _ => Err(AuthFailure::Unauthenticated),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_roles() {
        let id = Ulid::new();
        assert_eq!(UserNameIdentity.identify(&format!("client:{id}")), Ok(Actor::Client(id)));
        assert_eq!(UserNameIdentity.identify(&format!("pro:{id}")), Ok(Actor::Professional(id)));
        assert_eq!(UserNameIdentity.identify("admin"), Ok(Actor::Admin));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(UserNameIdentity.identify("postgres"), Err(AuthFailure::Unauthenticated));
        assert_eq!(UserNameIdentity.identify("client:nope"), Err(AuthFailure::Unauthenticated));
        assert_eq!(
            UserNameIdentity.identify(&format!("guest:{}", Ulid::new())),
            Err(AuthFailure::Unauthenticated)
        );
    }

    #[test]
    fn role_guards() {
        let id = Ulid::new();
        assert_eq!(Actor::Client(id).require_client(), Ok(id));
        assert!(Actor::Client(id).require_pro().is_err());
        assert!(Actor::Admin.require_client().is_err());
    }
}
