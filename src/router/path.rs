use crate::error::{ContractError, Result};
use crate::spec::ParameterStyle;
use crate::validator::LocationValues;
use regex::Regex;
use std::collections::HashMap;

/// Compiled matcher for one OpenAPI path template.
///
/// Each `{name}` becomes a capture group. Several parameters may share a
/// segment (`/files/{name}.{ext}`); `matrix` and `label` parameters capture
/// their `;` / `.` prefix too, because their parsers expect it.
#[derive(Debug, Clone)]
pub struct PathMatcher {
    template: String,
    regex: Regex,
    params: Vec<String>,
}

impl PathMatcher {
    /// Compile `base_path + template`.
    ///
    /// # Arguments
    ///
    /// * `base_path` - Server base path (`/v1`), may be empty
    /// * `template` - OpenAPI path template (`/pets/{id}`)
    /// * `styles` - Style of each path parameter; missing entries mean `simple`
    ///
    /// # Errors
    ///
    /// `UnsupportedContractFeature` for unbalanced braces or empty names.
    pub fn compile(base_path: &str, template: &str, styles: &HashMap<String, ParameterStyle>) -> Result<Self> {
        let full = format!("{base_path}{template}");
        let unsupported = |message: String| ContractError::unsupported(template.to_string(), message);

        let mut pattern = String::with_capacity(full.len() + 8);
        pattern.push('^');
        let mut params = Vec::with_capacity(full.matches('{').count());

        for segment in full.split('/').filter(|s| !s.is_empty()) {
            pattern.push('/');
            let mut rest = segment;
            while let Some(open) = rest.find('{') {
                pattern.push_str(&regex::escape(&rest[..open]));
                let close = rest[open..]
                    .find('}')
                    .map(|idx| open + idx)
                    .ok_or_else(|| unsupported(format!("unclosed '{{' in segment '{segment}'")))?;
                let name = &rest[open + 1..close];
                if name.is_empty() || name.contains('{') {
                    return Err(unsupported(format!("invalid parameter in segment '{segment}'")));
                }
                let group = match styles.get(name) {
                    Some(ParameterStyle::Matrix) => r"(;[^/]*)",
                    Some(ParameterStyle::Label) => r"(\.[^/]*)",
                    _ => r"([^/]+)",
                };
                pattern.push_str(group);
                params.push(name.to_string());
                rest = &rest[close + 1..];
            }
            if rest.contains('}') {
                return Err(unsupported(format!("unopened '}}' in segment '{segment}'")));
            }
            pattern.push_str(&regex::escape(rest));
        }
        if pattern.len() == 1 {
            pattern.push('/');
        }
        pattern.push('$');

        let regex = Regex::new(&pattern).map_err(|e| unsupported(format!("path regex does not compile: {e}")))?;
        Ok(Self {
            template: template.to_string(),
            regex,
            params,
        })
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Number of literal characters; more specific templates sort first.
    pub fn specificity(&self) -> (usize, usize) {
        let literal = self.template.len() - self.params.iter().map(|p| p.len() + 2).sum::<usize>();
        (self.params.len(), usize::MAX - literal)
    }

    /// Path parameters when `path` matches, still percent-encoded so the
    /// style parser can split before decoding.
    pub fn matches(&self, path: &str) -> Option<LocationValues> {
        let captures = self.regex.captures(path)?;
        let mut values = LocationValues::with_capacity(self.params.len());
        for (idx, name) in self.params.iter().enumerate() {
            let raw = captures.get(idx + 1).map(|m| m.as_str()).unwrap_or_default();
            values.insert(name.clone(), vec![raw.to_string()]);
        }
        Some(values)
    }
}
