/// Scheme and realm of an authentication challenge header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Lowercased scheme token, e.g. `basic`.
    pub scheme: String,
    pub realm: String,
}

/// Parse the first challenge of a `WWW-Authenticate` or
/// `Proxy-Authenticate` header value.
///
/// Only the scheme and the `realm` parameter are extracted. A missing realm
/// yields an empty string.
///
/// # Examples
///
/// ```
/// use pulith_loader::core::parse_challenge;
///
/// let challenge = parse_challenge(r#"Basic realm="staging""#).unwrap();
/// assert_eq!(challenge.scheme, "basic");
/// assert_eq!(challenge.realm, "staging");
/// ```
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, params) = match header.find(char::is_whitespace) {
        Some(split) => (&header[..split], header[split..].trim_start()),
        None => (header, ""),
    };
    if scheme.is_empty() || !super::is_valid_header_name(scheme) {
        return None;
    }

    Some(Challenge {
        scheme: scheme.to_ascii_lowercase(),
        realm: find_realm(params).unwrap_or_default(),
    })
}

fn find_realm(params: &str) -> Option<String> {
    let mut rest = params;
    while !rest.is_empty() {
        let (key, after_key) = rest.split_once('=')?;
        let key = key.trim().trim_start_matches(',').trim();
        let after_key = after_key.trim_start();

        let (value, remainder) = if let Some(quoted) = after_key.strip_prefix('"') {
            let end = quoted.find('"')?;
            (&quoted[..end], &quoted[end + 1..])
        } else {
            match after_key.find(',') {
                Some(end) => (after_key[..end].trim(), &after_key[end..]),
                None => (after_key.trim(), ""),
            }
        };

        if key.eq_ignore_ascii_case("realm") {
            return Some(value.to_owned());
        }
        rest = remainder.trim_start().trim_start_matches(',');
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_quoted_realm() {
        let c = parse_challenge(r#"Basic realm="Restricted Area""#).unwrap();
        assert_eq!(c.scheme, "basic");
        assert_eq!(c.realm, "Restricted Area");
    }

    #[test]
    fn test_realm_after_other_params() {
        let c = parse_challenge(r#"Digest qop="auth", nonce=abc123, realm="api""#).unwrap();
        assert_eq!(c.scheme, "digest");
        assert_eq!(c.realm, "api");
    }

    #[test]
    fn test_unquoted_realm() {
        let c = parse_challenge("Basic realm=intranet, charset=UTF-8").unwrap();
        assert_eq!(c.realm, "intranet");
    }

    #[test]
    fn test_scheme_without_params() {
        let c = parse_challenge("Negotiate").unwrap();
        assert_eq!(c.scheme, "negotiate");
        assert_eq!(c.realm, "");
    }

    #[test]
    fn test_invalid_headers() {
        assert_eq!(parse_challenge(""), None);
        assert_eq!(parse_challenge("   "), None);
        assert_eq!(parse_challenge("Bad/Scheme realm=x"), None);
    }
}
