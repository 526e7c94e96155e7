//! Authentication and authorization decisions for classified requests.
//!
//! | Category           | No identity       | Identity, no admin role | Identity + admin role |
//! |--------------------|-------------------|-------------------------|-----------------------|
//! | `Public`           | allow             | allow                   | allow                 |
//! | `Webhook`          | allow             | allow                   | allow                 |
//! | `ProtectedGeneral` | → sign-in         | allow                   | allow                 |
//! | `Default`          | → sign-in         | allow                   | allow                 |
//! | `ProtectedAdmin`   | → sign-in         | → insufficient access   | allow                 |
//!
//! Webhook signature verification is the webhook handler's job, not the gate's.
//! Roles are only consulted once an identity is present.

use serde::Serialize;
use url::form_urlencoded;

use super::classifier::Category;
use crate::identity::{Identity, IdentityProvider};

/// Query parameter carrying the post-login return path.
pub const REDIRECT_PARAM: &str = "redirect_url";

pub const DEFAULT_SIGN_IN_URL: &str = "/sign-in";

pub const DEFAULT_UNAUTHORIZED_URL: &str = "/?error=unauthorized";

pub const DEFAULT_ADMIN_ROLES: [&str; 2] = ["admin", "super_admin"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessOutcome {
    Allow,
    Unauthenticated,
    Unauthorized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    pub outcome: AccessOutcome,
    pub redirect_target: Option<String>,
}

impl AccessDecision {
    pub fn allow() -> Self {
        Self {
            outcome: AccessOutcome::Allow,
            redirect_target: None,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.outcome == AccessOutcome::Allow
    }
}

/// Redirect targets and the role set that unlocks admin routes.
#[derive(Debug, Clone)]
pub struct AccessGate {
    sign_in_url: String,
    unauthorized_url: String,
    admin_roles: Vec<String>,
}

impl AccessGate {
    pub fn new(sign_in_url: String, unauthorized_url: String, admin_roles: Vec<String>) -> Self {
        Self {
            sign_in_url,
            unauthorized_url,
            admin_roles,
        }
    }

    pub fn admin_roles(&self) -> &[String] {
        &self.admin_roles
    }

    /// Decide whether a request may proceed.
    ///
    /// `target` is the original request path, embedded in the sign-in
    /// redirect so the caller returns there after logging in.
    pub fn decide(
        &self,
        category: Category,
        identity: Option<&Identity>,
        target: &str,
        provider: &dyn IdentityProvider,
    ) -> AccessDecision {
        if !category.requires_identity() {
            return AccessDecision::allow();
        }

        let Some(identity) = identity else {
            return AccessDecision {
                outcome: AccessOutcome::Unauthenticated,
                redirect_target: Some(self.sign_in_target(target)),
            };
        };

        if category == Category::ProtectedAdmin
            && !provider.require_role(identity, &self.admin_roles)
        {
            return AccessDecision {
                outcome: AccessOutcome::Unauthorized,
                redirect_target: Some(self.unauthorized_url.clone()),
            };
        }

        AccessDecision::allow()
    }

    /// `<sign_in_url>?redirect_url=<percent-encoded target>`.
    pub fn sign_in_target(&self, target: &str) -> String {
        let encoded: String = form_urlencoded::byte_serialize(target.as_bytes()).collect();
        let separator = if self.sign_in_url.contains('?') { '&' } else { '?' };
        format!(
            "{}{separator}{REDIRECT_PARAM}={encoded}",
            self.sign_in_url
        )
    }
}

impl Default for AccessGate {
    fn default() -> Self {
        Self::new(
            DEFAULT_SIGN_IN_URL.to_string(),
            DEFAULT_UNAUTHORIZED_URL.to_string(),
            DEFAULT_ADMIN_ROLES.iter().map(|r| (*r).to_string()).collect(),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::identity::StaticTokenProvider;

    fn provider() -> StaticTokenProvider {
        StaticTokenProvider::default()
    }

    #[test]
    fn test_public_and_webhook_always_allowed() {
        let gate = AccessGate::default();
        for category in [Category::Public, Category::Webhook] {
            let decision = gate.decide(category, None, "/pricing", &provider());
            assert!(decision.is_allowed());
            assert!(decision.redirect_target.is_none());
        }
    }

    #[test]
    fn test_protected_without_identity_redirects_to_sign_in() {
        let gate = AccessGate::default();
        let decision = gate.decide(Category::ProtectedGeneral, None, "/dashboard/x", &provider());

        assert_eq!(decision.outcome, AccessOutcome::Unauthenticated);
        assert_eq!(
            decision.redirect_target.as_deref(),
            Some("/sign-in?redirect_url=%2Fdashboard%2Fx")
        );
    }

    #[test]
    fn test_default_category_is_treated_as_protected() {
        let gate = AccessGate::default();
        let anonymous = gate.decide(Category::Default, None, "/somewhere", &provider());
        assert_eq!(anonymous.outcome, AccessOutcome::Unauthenticated);

        let member = Identity::new("u1");
        let signed_in = gate.decide(Category::Default, Some(&member), "/somewhere", &provider());
        assert!(signed_in.is_allowed());
    }

    #[test]
    fn test_protected_with_identity_allowed() {
        let gate = AccessGate::default();
        let identity = Identity::new("u1");
        let decision = gate.decide(Category::ProtectedGeneral, Some(&identity), "/boards", &provider());
        assert!(decision.is_allowed());
    }

    #[test]
    fn test_admin_without_identity_is_unauthenticated() {
        let gate = AccessGate::default();
        let decision = gate.decide(Category::ProtectedAdmin, None, "/admin/users", &provider());
        assert_eq!(decision.outcome, AccessOutcome::Unauthenticated);
        assert!(decision.redirect_target.unwrap().starts_with("/sign-in?"));
    }

    #[test]
    fn test_admin_with_insufficient_roles_is_unauthorized() {
        let gate = AccessGate::default();
        let identity = Identity::new("u1").with_role("member");
        let decision = gate.decide(Category::ProtectedAdmin, Some(&identity), "/admin/users", &provider());

        assert_eq!(decision.outcome, AccessOutcome::Unauthorized);
        assert_eq!(decision.redirect_target.as_deref(), Some("/?error=unauthorized"));
    }

    #[test]
    fn test_admin_roles_grant_access() {
        let gate = AccessGate::default();
        for role in ["admin", "super_admin"] {
            let identity = Identity::new("u1").with_role(role);
            let decision = gate.decide(Category::ProtectedAdmin, Some(&identity), "/admin", &provider());
            assert!(decision.is_allowed(), "role {role} should unlock admin");
        }
    }

    #[test]
    fn test_sign_in_target_appends_to_existing_query() {
        let gate = AccessGate::new(
            "/login?tenant=acme".to_string(),
            "/denied".to_string(),
            vec!["admin".to_string()],
        );
        assert_eq!(
            gate.sign_in_target("/settings/billing"),
            "/login?tenant=acme&redirect_url=%2Fsettings%2Fbilling"
        );
    }

    #[test]
    fn test_sign_in_target_encodes_hostile_paths() {
        let gate = AccessGate::default();
        let target = gate.sign_in_target("/x&redirect_url=https://evil.example");
        assert_eq!(target.matches("redirect_url=").count(), 1);
        assert!(!target.contains("https://"));
    }
}
