//! Scope-token collaborator
//!
//! Scope tokens decide which peers belong to the same mesh. Their
//! semantics live outside the discovery core; it only asks the questions
//! below.

/// Resolves scope tokens carried by peers
pub trait ScopeResolver: Send + Sync {
    /// Token of this node's own scope, if it has one
    fn own_scope_token(&self) -> Option<String>;

    /// Whether a peer's token denotes this node's scope
    fn resolves_to_own_scope(&self, token: &str) -> bool;

    /// Qualify an advertised role with the scope it was granted in
    fn qualify_role(&self, role: &str) -> String;
}

/// Unscoped node: owns no token and resolves none
#[derive(Debug, Default, Clone, Copy)]
pub struct NoScope;

impl ScopeResolver for NoScope {
    fn own_scope_token(&self) -> Option<String> {
        None
    }

    fn resolves_to_own_scope(&self, _token: &str) -> bool {
        false
    }

    fn qualify_role(&self, role: &str) -> String {
        role.to_string()
    }
}

/// A single fixed scope token
#[derive(Debug, Clone)]
pub struct StaticScope {
    token: String,
}

impl StaticScope {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl ScopeResolver for StaticScope {
    fn own_scope_token(&self) -> Option<String> {
        Some(self.token.clone())
    }

    fn resolves_to_own_scope(&self, token: &str) -> bool {
        token == self.token
    }

    fn qualify_role(&self, role: &str) -> String {
        format!("{}@{}", role, self.token)
    }
}
