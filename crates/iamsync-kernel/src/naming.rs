//! Remote object name grammar.

use crate::error::KernelError;
use crate::resource::Kind;
use regex::Regex;
use std::sync::OnceLock;

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[\w+=,.@-]+$").expect("name regex should compile"))
}

/// Longest name the identity service accepts for `kind`.
pub fn max_name_len(kind: Kind) -> usize {
    match kind {
        Kind::Role | Kind::User => 64,
        Kind::Policy | Kind::Group => 128,
        Kind::PolicyAttachment | Kind::AssumeRolePolicy => 253,
    }
}

/// Validate a final (prefixed) remote name before any remote call.
pub fn validate_remote_name(kind: Kind, name: &str) -> Result<(), KernelError> {
    let invalid = |reason: String| KernelError::InvalidName {
        kind: kind.to_string(),
        name: name.to_string(),
        reason,
    };
    if name.is_empty() {
        return Err(invalid("name is empty".to_string()));
    }
    let max = max_name_len(kind);
    if name.chars().count() > max {
        return Err(invalid(format!("longer than {max} characters")));
    }
    if !name_re().is_match(name) {
        return Err(invalid(
            "only alphanumerics and `+=,.@_-` are allowed".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_service_grammar() {
        validate_remote_name(Kind::Role, "k8s-app.reader@team_a").expect("valid role name");
        validate_remote_name(Kind::Policy, &"p".repeat(128)).expect("policy at max length");
    }

    #[test]
    fn rejects_bad_names() {
        assert!(validate_remote_name(Kind::Role, "").is_err());
        assert!(validate_remote_name(Kind::Role, &"r".repeat(65)).is_err());
        let err = validate_remote_name(Kind::User, "has space").expect_err("space is invalid");
        assert!(matches!(err, KernelError::InvalidName { ref kind, .. } if kind == "User"));
    }
}
