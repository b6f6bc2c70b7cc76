/// An HTTP header as a name-value pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub name: String,
    pub value: String,
}

impl Header {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// An ordered header list with set-header semantics.
///
/// [`set`](HeaderList::set) replaces the value of an existing header with
/// the same name (ASCII case-insensitive) in place, so the list keeps the
/// order in which names first appeared and never holds duplicates through
/// that path. [`append`](HeaderList::append) keeps duplicates, which is
/// what response headers such as `Set-Cookie` need.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    entries: Vec<Header>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self
            .entries
            .iter_mut()
            .find(|h| h.name.eq_ignore_ascii_case(&name))
        {
            Some(existing) => existing.value = value,
            None => self.entries.push(Header { name, value }),
        }
    }

    pub fn append(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push(Header::new(name, value));
    }

    /// First value for `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Header> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_vec(self) -> Vec<Header> {
        self.entries
    }
}

impl FromIterator<Header> for HeaderList {
    fn from_iter<I: IntoIterator<Item = Header>>(iter: I) -> Self {
        let mut list = Self::new();
        for header in iter {
            list.set(header.name, header.value);
        }
        list
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_case_insensitively_in_place() {
        let mut list = HeaderList::new();
        list.set("Accept", "*/*");
        list.set("X-Trace", "1");
        list.set("accept", "text/html");

        let headers = list.into_vec();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0], Header::new("Accept", "text/html"));
        assert_eq!(headers[1], Header::new("X-Trace", "1"));
    }

    #[test]
    fn append_keeps_duplicates() {
        let mut list = HeaderList::new();
        list.append("Set-Cookie", "a=1");
        list.append("Set-Cookie", "b=2");

        assert_eq!(list.len(), 2);
        assert_eq!(list.get("set-cookie"), Some("a=1"));
    }

    #[test]
    fn get_missing() {
        let list = HeaderList::new();
        assert!(list.is_empty());
        assert_eq!(list.get("X-Missing"), None);
        assert!(!list.contains("X-Missing"));
    }

    #[test]
    fn collect_uses_set_semantics() {
        let list: HeaderList = vec![
            Header::new("Host", "a.example"),
            Header::new("HOST", "b.example"),
        ]
        .into_iter()
        .collect();

        assert_eq!(list.len(), 1);
        assert_eq!(list.get("host"), Some("b.example"));
    }
}
