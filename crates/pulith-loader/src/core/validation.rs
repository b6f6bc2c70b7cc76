use crate::data::HeaderList;

/// Returns `true` if `name` is a non-empty HTTP token (RFC 9110 `tchar`s).
///
/// # Examples
///
/// ```
/// use pulith_loader::core::is_valid_header_name;
///
/// assert!(is_valid_header_name("X-Test"));
/// assert!(!is_valid_header_name("Bad Name"));
/// assert!(!is_valid_header_name(""));
/// ```
pub fn is_valid_header_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(is_tchar)
}

/// Returns `true` if `value` is a valid field value: visible characters,
/// obs-text, spaces and horizontal tabs only. Control characters such as
/// CR, LF and NUL are rejected.
pub fn is_valid_header_value(value: &str) -> bool {
    value
        .bytes()
        .all(|b| b == b'\t' || (b' '..=b'~').contains(&b) || b >= 0x80)
}

fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

/// Keep the entries whose name and value are both valid, in input order.
///
/// Invalid entries are dropped without error. A later entry with the same
/// name replaces the earlier value.
pub fn valid_headers<I>(entries: I) -> HeaderList
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut headers = HeaderList::new();
    for (name, value) in entries {
        if is_valid_header_name(&name) && is_valid_header_value(&value) {
            headers.set(name, value);
        } else {
            tracing::debug!(header = %name, "dropping invalid extra header");
        }
    }
    headers
}
