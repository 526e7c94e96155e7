//! Route classification: maps a request path to exactly one [`Category`].
//!
//! Rules are data, not code. Each rule pairs a [`RoutePattern`] with a
//! category, and the classifier evaluates them in a fixed priority order:
//!
//! ```text
//! Public > Webhook > ProtectedAdmin > ProtectedGeneral > Default
//! ```
//!
//! The first matching rule wins. A path that matches nothing resolves to
//! [`Category::Default`], which the access gate treats exactly like
//! `ProtectedGeneral`. Unknown paths therefore fail safe.
//!
//! # Pattern Syntax
//!
//! | Pattern          | Kind   | Matches                                  |
//! |------------------|--------|------------------------------------------|
//! | `/about`         | exact  | `/about` only                            |
//! | `/blog*`         | prefix | `/blog`, `/blog/post-1`, `/blogroll`     |
//! | `/admin(.*)`     | prefix | same as `/admin*`                        |
//!
//! Matching runs against the normalized path: repeated slashes are collapsed
//! and `.`/`..` segments are resolved, so `/api/public/../../admin` is
//! classified as `/admin`.

use std::fmt;

use serde::Serialize;
use tracing::warn;

/// Classification outcome for a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Public,
    Webhook,
    ProtectedAdmin,
    ProtectedGeneral,
    /// No rule matched. Treated as `ProtectedGeneral`.
    Default,
}

impl Category {
    /// Evaluation rank; lower ranks are tried first.
    pub const fn priority(self) -> u8 {
        match self {
            Category::Public => 0,
            Category::Webhook => 1,
            Category::ProtectedAdmin => 2,
            Category::ProtectedGeneral => 3,
            Category::Default => 4,
        }
    }

    /// Whether the access gate needs a resolved identity for this category.
    pub const fn requires_identity(self) -> bool {
        matches!(
            self,
            Category::ProtectedAdmin | Category::ProtectedGeneral | Category::Default
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Category::Public => "public",
            Category::Webhook => "webhook",
            Category::ProtectedAdmin => "protected_admin",
            Category::ProtectedGeneral => "protected_general",
            Category::Default => "default",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A literal path or a literal prefix followed by a wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePattern {
    Exact(String),
    Prefix(String),
}

impl RoutePattern {
    /// Parse a pattern string.
    ///
    /// Returns `None` unless the pattern is an absolute path.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if !raw.starts_with('/') {
            return None;
        }

        if let Some(prefix) = raw
            .strip_suffix("(.*)")
            .or_else(|| raw.strip_suffix('*'))
        {
            return Some(Self::Prefix(prefix.to_string()));
        }

        Some(Self::Exact(raw.to_string()))
    }

    #[inline]
    pub fn matches(&self, path: &str) -> bool {
        match self {
            RoutePattern::Exact(expected) => path == expected,
            RoutePattern::Prefix(prefix) => path.starts_with(prefix.as_str()),
        }
    }
}

/// A single entry of the rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pub pattern: RoutePattern,
    pub category: Category,
}

impl RouteRule {
    pub fn new(pattern: RoutePattern, category: Category) -> Self {
        Self { pattern, category }
    }
}

/// Pattern lists per rule group, as read from configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteGroups {
    pub public: Vec<String>,
    pub webhook: Vec<String>,
    pub admin: Vec<String>,
    pub protected: Vec<String>,
}

pub const DEFAULT_PUBLIC_ROUTES: &[&str] = &[
    "/",
    "/sign-in*",
    "/sign-up*",
    "/pricing*",
    "/blog*",
    "/about",
    "/contact",
    "/api/public*",
    "/health",
    "/ready",
];

pub const DEFAULT_WEBHOOK_ROUTES: &[&str] = &["/api/webhooks*"];

pub const DEFAULT_ADMIN_ROUTES: &[&str] = &["/admin*"];

pub const DEFAULT_PROTECTED_ROUTES: &[&str] = &[
    "/dashboard*",
    "/account*",
    "/settings*",
    "/boards*",
    "/api*",
];

fn owned(patterns: &[&str]) -> Vec<String> {
    patterns.iter().map(|p| (*p).to_string()).collect()
}

impl Default for RouteGroups {
    fn default() -> Self {
        Self {
            public: owned(DEFAULT_PUBLIC_ROUTES),
            webhook: owned(DEFAULT_WEBHOOK_ROUTES),
            admin: owned(DEFAULT_ADMIN_ROUTES),
            protected: owned(DEFAULT_PROTECTED_ROUTES),
        }
    }
}

/// Pure, total path classifier backed by a priority-ordered rule table.
#[derive(Debug, Clone)]
pub struct RouteClassifier {
    rules: Vec<RouteRule>,
}

impl RouteClassifier {
    /// Build a classifier from an arbitrary rule list.
    ///
    /// Rules are stably sorted by category priority, so the relative order of
    /// rules within one group is preserved.
    pub fn new(rules: impl IntoIterator<Item = RouteRule>) -> Self {
        let mut rules: Vec<RouteRule> = rules.into_iter().collect();
        rules.sort_by_key(|rule| rule.category.priority());
        Self { rules }
    }

    /// Build a classifier from configured pattern groups.
    ///
    /// Invalid patterns are logged and skipped.
    pub fn from_groups(groups: &RouteGroups) -> Self {
        let grouped = [
            (Category::Public, &groups.public),
            (Category::Webhook, &groups.webhook),
            (Category::ProtectedAdmin, &groups.admin),
            (Category::ProtectedGeneral, &groups.protected),
        ];

        let rules = grouped.into_iter().flat_map(|(category, patterns)| {
            patterns.iter().filter_map(move |raw| {
                let parsed = RoutePattern::parse(raw);
                if parsed.is_none() {
                    warn!(pattern = %raw, category = %category, "Invalid route pattern, skipping");
                }
                parsed.map(|pattern| RouteRule::new(pattern, category))
            })
        });

        Self::new(rules)
    }

    /// Classify a request path.
    pub fn classify(&self, path: &str) -> Category {
        let normalized = normalize_path(path);
        self.rules
            .iter()
            .find(|rule| rule.pattern.matches(&normalized))
            .map(|rule| rule.category)
            .unwrap_or(Category::Default)
    }

    /// Whether a path may skip the gate as a static asset.
    ///
    /// Framework asset paths skip unless a rule claims them for a webhook or
    /// protected category. A file extension alone is only enough on public
    /// routes, so `/dashboard/export.json` is always gated.
    pub fn is_passthrough(&self, path: &str) -> bool {
        let normalized = normalize_path(path);
        if is_always_gated(&normalized) {
            return false;
        }

        match self.classify(&normalized) {
            Category::Public => {
                is_framework_asset(&normalized) || has_static_extension(&normalized)
            }
            Category::Default => is_framework_asset(&normalized),
            Category::Webhook | Category::ProtectedAdmin | Category::ProtectedGeneral => false,
        }
    }

    pub fn rules(&self) -> &[RouteRule] {
        &self.rules
    }
}

impl Default for RouteClassifier {
    fn default() -> Self {
        Self::from_groups(&RouteGroups::default())
    }
}

/// Collapse repeated slashes and resolve `.` and `..` segments.
///
/// `..` never climbs above the root. A trailing slash is kept so that
/// exact patterns keep their strict meaning.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }

    let mut normalized = String::with_capacity(path.len().max(1));
    for segment in &segments {
        normalized.push('/');
        normalized.push_str(segment);
    }

    let trailing = path.len() > 1 && path.ends_with('/') && !segments.is_empty();
    if trailing || normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

const STATIC_PREFIXES: [&str; 2] = ["/_next/", "/static/"];

const STATIC_FILES: [&str; 3] = ["/favicon.ico", "/robots.txt", "/sitemap.xml"];

const STATIC_EXTENSIONS: [&str; 12] = [
    "png", "jpg", "jpeg", "gif", "svg", "css", "js", "ico", "webp", "txt", "xml", "json",
];

const ALWAYS_GATED: [&str; 2] = ["/api", "/trpc"];

/// Whether a path looks like a static asset, by location or file extension.
///
/// Anything under `/api` or `/trpc` is never a static asset. This only
/// describes the path; [`RouteClassifier::is_passthrough`] decides whether
/// the gate is actually skipped.
pub fn is_static_asset(path: &str) -> bool {
    let path = normalize_path(path);
    !is_always_gated(&path) && (is_framework_asset(&path) || has_static_extension(&path))
}

fn is_always_gated(normalized: &str) -> bool {
    ALWAYS_GATED.iter().any(|root| {
        normalized
            .strip_prefix(root)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    })
}

fn is_framework_asset(normalized: &str) -> bool {
    STATIC_FILES.contains(&normalized)
        || STATIC_PREFIXES.iter().any(|prefix| normalized.starts_with(prefix))
}

fn has_static_extension(normalized: &str) -> bool {
    let file_name = normalized.rsplit('/').next().unwrap_or_default();
    match file_name.rsplit_once('.') {
        Some((stem, extension)) if !stem.is_empty() => STATIC_EXTENSIONS
            .iter()
            .any(|known| known.eq_ignore_ascii_case(extension)),
        _ => false,
    }
}
