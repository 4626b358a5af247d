/// URL utilities
pub mod url {
    use url::Url;

    /// Substitute `{key}` placeholders. Unknown placeholders are left as-is.
    pub fn fill_template(template: &str, values: &[(&str, &str)]) -> String {
        values
            .iter()
            .fold(template.to_string(), |acc, (key, value)| {
                acc.replace(&format!("{{{key}}}"), value)
            })
    }

    /// Percent-encode a value for use inside a query string.
    pub fn encode_component(value: &str) -> String {
        url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
    }

    /// Resolve `link` against the page it was found on.
    pub fn resolve(base: &str, link: &str) -> Option<String> {
        if let Ok(absolute) = Url::parse(link) {
            return Some(absolute.to_string());
        }
        Url::parse(base).ok()?.join(link).ok().map(|u| u.to_string())
    }

    /// The matching document extension of `link`'s path, lowercased.
    pub fn document_extension(link: &str, extensions: &[String]) -> Option<String> {
        let path = match Url::parse(link) {
            Ok(u) => u.path().to_string(),
            Err(_) => link.split(['?', '#']).next().unwrap_or_default().to_string(),
        };
        let (_, ext) = path.rsplit_once('.')?;
        extensions
            .iter()
            .find(|candidate| candidate.eq_ignore_ascii_case(ext))
            .map(|e| e.to_ascii_lowercase())
    }
}

/// Text utilities
pub mod text {
    /// Make a report title safe to use as a file name.
    pub fn sanitize_file_name(title: &str) -> String {
        let cleaned: String = title
            .trim()
            .chars()
            .map(|c| match c {
                '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
                c if c.is_control() => '_',
                c => c,
            })
            .collect();
        let cleaned = cleaned.trim_matches('.').trim();
        if cleaned.is_empty() {
            "untitled".to_string()
        } else {
            cleaned.to_string()
        }
    }
}
