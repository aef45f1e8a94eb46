// ABOUTME: Caller identity for admission control
// ABOUTME: Authenticated users and anonymous addresses draw from separately namespaced quota pools

use std::fmt;

/// Who is submitting. Authenticated callers are keyed by user id,
/// anonymous callers by network address, so neither pool can exhaust
/// the other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallerIdentity {
    User(String),
    Anonymous(String),
}

impl CallerIdentity {
    /// Namespaced key used by the rate limiter store.
    pub fn quota_key(&self) -> String {
        match self {
            CallerIdentity::User(id) => format!("user:{}", id),
            CallerIdentity::Anonymous(addr) => format!("ip:{}", addr),
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, CallerIdentity::User(_))
    }
}

impl fmt::Display for CallerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.quota_key())
    }
}
