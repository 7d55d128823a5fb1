//! Scope negotiation
//!
//! Every authorization and refresh request carries the mandatory identity
//! scopes first, followed by the user's extra scopes in their configured
//! order. Keeping the order stable keeps the consent screen cache stable.

/// Read the signed-in user's profile.
pub const GRAPH_USER_READ: &str = "https://graph.microsoft.com/User.Read";
/// Graph "all statically configured permissions" wildcard.
pub const GRAPH_DEFAULT: &str = "https://graph.microsoft.com/.default";
/// Requests a refresh token.
pub const OFFLINE_ACCESS: &str = "offline_access";

/// Scopes requested on every sign-in, in this order.
pub const MANDATORY_IDENTITY_SCOPES: [&str; 5] =
    [GRAPH_USER_READ, "openid", "profile", "email", OFFLINE_ACCESS];

/// Merge configured scopes with the mandatory identity scopes.
///
/// Extras are trimmed, blanks and duplicates dropped, and the Graph wildcard
/// and bare `offline_access` are never forwarded.
pub fn negotiate<S: AsRef<str>>(configured: &[S]) -> Vec<String> {
    let mut scopes: Vec<String> = MANDATORY_IDENTITY_SCOPES
        .iter()
        .map(|s| s.to_string())
        .collect();

    for scope in configured {
        let scope = scope.as_ref().trim();
        if scope.is_empty()
            || scope == GRAPH_DEFAULT
            || scope == OFFLINE_ACCESS
            || scopes.iter().any(|s| s == scope)
        {
            continue;
        }
        scopes.push(scope.to_string());
    }

    scopes
}

/// Scopes the provider actually granted, falling back to what was requested
/// when the provider omits the `scope` field.
pub fn granted_scopes(reported: Option<&str>, requested: &[String]) -> Vec<String> {
    match reported {
        Some(scope) if !scope.trim().is_empty() => {
            scope.split_whitespace().map(String::from).collect()
        }
        _ => requested.to_vec(),
    }
}

/// Space-separated form used on the wire.
pub fn join(scopes: &[String]) -> String {
    scopes.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mandatory() -> Vec<String> {
        MANDATORY_IDENTITY_SCOPES.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_configuration_yields_mandatory_scopes() {
        let empty: [&str; 0] = [];
        assert_eq!(negotiate(&empty), mandatory());
    }

    #[test]
    fn test_extras_follow_mandatory_in_configured_order() {
        let scopes = negotiate(&[
            "https://graph.microsoft.com/Calendars.Read",
            "https://graph.microsoft.com/Chat.Read",
        ]);
        assert_eq!(&scopes[..5], &mandatory()[..]);
        assert_eq!(
            &scopes[5..],
            &[
                "https://graph.microsoft.com/Calendars.Read".to_string(),
                "https://graph.microsoft.com/Chat.Read".to_string(),
            ]
        );
    }

    #[test]
    fn test_wildcard_and_offline_access_are_dropped() {
        let scopes = negotiate(&[GRAPH_DEFAULT, OFFLINE_ACCESS, "openid"]);
        assert_eq!(scopes, mandatory());
    }

    #[test]
    fn test_duplicates_and_blanks_are_dropped() {
        let scopes = negotiate(&[
            " Mail.Read ",
            "",
            "Mail.Read",
            "   ",
            GRAPH_USER_READ,
            "Files.Read",
        ]);
        assert_eq!(
            &scopes[5..],
            &["Mail.Read".to_string(), "Files.Read".to_string()]
        );
    }

    #[test]
    fn test_each_mandatory_scope_appears_once() {
        let inputs: Vec<Vec<&str>> = vec![
            vec![],
            vec!["openid", "openid", "profile"],
            vec![GRAPH_DEFAULT],
            vec!["email", "Sites.Read.All", OFFLINE_ACCESS, GRAPH_USER_READ],
        ];
        for input in inputs {
            let scopes = negotiate(&input);
            for required in MANDATORY_IDENTITY_SCOPES {
                assert_eq!(scopes.iter().filter(|s| *s == required).count(), 1);
            }
            assert!(!scopes.iter().any(|s| s == GRAPH_DEFAULT));
        }
    }

    #[test]
    fn test_negotiation_is_deterministic() {
        let input = ["Team.ReadBasic.All", "Chat.Read", "User.ReadBasic.All"];
        assert_eq!(negotiate(&input), negotiate(&input));
    }

    #[test]
    fn test_granted_scopes_from_provider() {
        let requested = mandatory();
        assert_eq!(
            granted_scopes(Some("User.Read Mail.Read"), &requested),
            vec!["User.Read".to_string(), "Mail.Read".to_string()]
        );
    }

    #[test]
    fn test_granted_scopes_fall_back_to_requested() {
        let requested = mandatory();
        assert_eq!(granted_scopes(None, &requested), requested);
        assert_eq!(granted_scopes(Some("  "), &requested), requested);
    }
}
