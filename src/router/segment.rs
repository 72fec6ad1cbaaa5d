//! The routing trie. One [`Segment`] per `/`-delimited URI token; literal
//! tokens compare as strings, tokens embedding `{name}` / `{name?}`
//! placeholders compile to an anchored regex. Children are kept in
//! registration order and matched first-match-wins, with no backtracking:
//! when a literal and a variable segment could both match, whichever was
//! registered first takes the request. That ordering is deliberate and must
//! not be replaced with longest-match or most-specific-match.

use crate::router::Route;
use regex::Regex;
use std::sync::Arc;

/// Path variables extracted from a matched URI, in template order. Only
/// variables that matched non-empty text are present; a skipped optional
/// variable contributes no key at all.
#[derive(Debug, Clone, Default)]
pub struct PathVariables {
    entries: Vec<(String, String)>,
}

impl PathVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has(&self, name: &str) -> bool {
        self.entries.iter().any(|(n, _)| n == name)
    }

    pub fn insert(&mut self, name: &str, value: &str) {
        self.entries.push((name.to_string(), value.to_string()));
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compiled form of one path token.
#[derive(Debug, Clone)]
pub(crate) enum SegmentMatcher {
    /// No embedded variables; plain string comparison.
    Literal { case_sensitive: bool },
    /// At least one `{name}` / `{name?}`; variables listed in capture order.
    Pattern {
        regex: Regex,
        variables: Vec<String>,
    },
}

/// Compiles a path token into its matcher. Pure; unit-tested apart from the
/// trie. `{name}` becomes a required capture `(.+)`, `{name?}` an optional
/// capture `(.*)`, literal text is regex-escaped. Malformed templates are
/// boot-time programmer errors and panic.
pub(crate) fn compile_token(token: &str, case_sensitive: bool) -> SegmentMatcher {
    if !token.contains('{') && !token.contains('}') {
        return SegmentMatcher::Literal { case_sensitive };
    }

    let mut pattern = if case_sensitive {
        String::from("^")
    } else {
        String::from("(?i)^")
    };
    let mut variables = Vec::new();
    let mut rest = token;

    while let Some(open) = rest.find('{') {
        let (literal, tail) = rest.split_at(open);
        if let Some(stray) = literal.find('}') {
            panic!(
                "unmatched '}}' at offset {} in route segment '{}'",
                stray, token
            );
        }
        pattern.push_str(&regex::escape(literal));

        let close = tail
            .find('}')
            .unwrap_or_else(|| panic!("unterminated '{{' in route segment '{}'", token));
        let inner = &tail[1..close];
        let (name, optional) = match inner.strip_suffix('?') {
            Some(name) => (name, true),
            None => (inner, false),
        };
        if name.is_empty() {
            panic!("empty variable name in route segment '{}'", token);
        }
        variables.push(name.to_string());
        pattern.push_str(if optional { "(.*)" } else { "(.+)" });
        rest = &tail[close + 1..];
    }

    if rest.contains('}') {
        panic!("unmatched '}}' in route segment '{}'", token);
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');

    let regex = Regex::new(&pattern)
        .unwrap_or_else(|e| panic!("route segment '{}' compiled to bad regex: {}", token, e));
    SegmentMatcher::Pattern { regex, variables }
}

/// Returns the variable names embedded in a full URI's tokens, used at
/// registration time to reject duplicates within one template.
pub(crate) fn template_variables(tokens: &[&str]) -> Vec<String> {
    let mut names = Vec::new();
    for token in tokens {
        if let SegmentMatcher::Pattern { variables, .. } = compile_token(token, true) {
            names.extend(variables);
        }
    }
    names
}

/// One node of a per-method routing trie.
pub(crate) struct Segment {
    text: String,
    matcher: SegmentMatcher,
    children: Vec<Segment>,
    route: Option<Arc<Route>>,
}

impl Segment {
    pub(crate) fn root() -> Segment {
        Segment::new("", false)
    }

    pub(crate) fn new(text: &str, case_sensitive: bool) -> Segment {
        Segment {
            text: text.to_string(),
            matcher: compile_token(text, case_sensitive),
            children: Vec::new(),
            route: None,
        }
    }

    pub(crate) fn matches(&self, token: &str) -> bool {
        match &self.matcher {
            SegmentMatcher::Literal { case_sensitive: true } => self.text == token,
            SegmentMatcher::Literal { case_sensitive: false } => {
                self.text.eq_ignore_ascii_case(token)
            }
            SegmentMatcher::Pattern { regex, .. } => regex.is_match(token),
        }
    }

    /// Re-runs the matcher and records every capture that matched non-empty
    /// text. An optional variable that matched nothing stays absent.
    pub(crate) fn capture(&self, token: &str, vars: &mut PathVariables) {
        if let SegmentMatcher::Pattern { regex, variables } = &self.matcher {
            if let Some(caps) = regex.captures(token) {
                for (i, name) in variables.iter().enumerate() {
                    if let Some(m) = caps.get(i + 1) {
                        if !m.as_str().is_empty() {
                            vars.insert(name, m.as_str());
                        }
                    }
                }
            }
        }
    }

    /// Walks/creates children keyed by raw token text and attaches the route
    /// at exhaustion. Registering the same token path twice overwrites the
    /// terminal route: last registration wins.
    pub(crate) fn add_route(&mut self, tokens: &[&str], route: Arc<Route>) {
        match tokens.split_first() {
            None => {
                if self.route.is_some() {
                    log::warn!(
                        "route '{}' re-registered; last registration wins",
                        route.uri()
                    );
                }
                self.route = Some(route);
            }
            Some((token, rest)) => {
                let position = self.children.iter().position(|c| c.text == *token);
                let child = match position {
                    Some(i) => &mut self.children[i],
                    None => {
                        self.children.push(Segment::new(token, route.case_sensitive()));
                        self.children.last_mut().unwrap()
                    }
                };
                child.add_route(rest, route);
            }
        }
    }

    /// Resolves the terminal segment for a token list, collecting variables
    /// along the way. First matching child wins at every depth.
    pub(crate) fn find(&self, tokens: &[&str], vars: &mut PathVariables) -> Option<&Segment> {
        match tokens.split_first() {
            None => Some(self),
            Some((token, rest)) => {
                for child in &self.children {
                    if child.matches(token) {
                        child.capture(token, vars);
                        return child.find(rest, vars);
                    }
                }
                None
            }
        }
    }

    pub(crate) fn find_route(
        &self,
        tokens: &[&str],
        vars: &mut PathVariables,
    ) -> Option<Arc<Route>> {
        self.find(tokens, vars).and_then(|s| s.route.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Emitter;
    use crate::handler::HandlerFuture;
    use crate::http::{Request, Response};

    fn noop<'a>(_req: &'a mut Request, _res: &'a mut Response) -> HandlerFuture<'a> {
        Box::pin(async move { Ok(None) })
    }

    fn route(uri: &str) -> Arc<Route> {
        Arc::new(Route::new(uri, Box::new(noop), false, Emitter::new()))
    }

    fn case_sensitive_route(uri: &str) -> Arc<Route> {
        Arc::new(Route::new(uri, Box::new(noop), true, Emitter::new()))
    }

    #[test]
    fn literal_tokens_skip_regex_compilation() {
        assert!(matches!(
            compile_token("users", false),
            SegmentMatcher::Literal { .. }
        ));
        assert!(matches!(
            compile_token("foo-{name}", false),
            SegmentMatcher::Pattern { .. }
        ));
    }

    #[test]
    fn compiled_pattern_lists_variables_in_order() {
        match compile_token("{a}-{b?}", true) {
            SegmentMatcher::Pattern { variables, .. } => {
                assert_eq!(variables, vec!["a".to_string(), "b".to_string()]);
            }
            _ => panic!("expected a pattern"),
        }
    }

    #[test]
    #[should_panic(expected = "unterminated")]
    fn open_brace_without_close_panics() {
        compile_token("foo-{name", false);
    }

    #[test]
    #[should_panic(expected = "empty variable name")]
    fn empty_variable_name_panics() {
        compile_token("foo-{}", false);
    }

    #[test]
    fn literal_round_trip_and_miss() {
        let mut root = Segment::root();
        root.add_route(&["a", "b", "c"], route("/a/b/c"));

        let mut vars = PathVariables::new();
        assert!(root.find_route(&["a", "b", "c"], &mut vars).is_some());
        assert!(root.find_route(&["a", "b", "d"], &mut vars).is_none());
    }

    #[test]
    fn required_variable_extraction() {
        let mut root = Segment::root();
        root.add_route(&["foo-{name}"], route("/foo-{name}"));

        let mut vars = PathVariables::new();
        assert!(root.find_route(&["foo-bar"], &mut vars).is_some());
        assert_eq!(vars.get("name"), Some("bar"));

        let mut vars = PathVariables::new();
        assert!(root.find_route(&["bar-bar"], &mut vars).is_none());
    }

    #[test]
    fn empty_optional_variable_is_omitted_not_empty() {
        let mut root = Segment::root();
        root.add_route(&["foo-{name?}"], route("/foo-{name?}"));

        let mut vars = PathVariables::new();
        assert!(root.find_route(&["foo-"], &mut vars).is_some());
        assert!(!vars.has("name"));

        let mut vars = PathVariables::new();
        assert!(root.find_route(&["foo-baz"], &mut vars).is_some());
        assert_eq!(vars.get("name"), Some("baz"));
    }

    #[test]
    fn case_sensitivity_toggle() {
        let insensitive = Segment::new("foo", false);
        assert!(insensitive.matches("foo"));
        assert!(insensitive.matches("FOO"));

        let sensitive = Segment::new("foo", true);
        assert!(sensitive.matches("foo"));
        assert!(!sensitive.matches("FOO"));

        let pattern = Segment::new("foo-{x}", false);
        assert!(pattern.matches("FOO-bar"));
        let pattern = Segment::new("foo-{x}", true);
        assert!(!pattern.matches("FOO-bar"));
    }

    #[test]
    fn first_registered_child_wins_ambiguity() {
        // Literal first: the literal takes /foo/bar.
        let mut root = Segment::root();
        let literal = route("/foo/bar");
        root.add_route(&["foo", "bar"], literal.clone());
        root.add_route(&["foo", "{x}"], route("/foo/{x}"));

        let mut vars = PathVariables::new();
        let hit = root.find_route(&["foo", "bar"], &mut vars).unwrap();
        assert!(Arc::ptr_eq(&hit, &literal));
        assert!(vars.is_empty());

        // Variable first: the variable takes /foo/bar instead.
        let mut root = Segment::root();
        let variable = route("/foo/{x}");
        root.add_route(&["foo", "{x}"], variable.clone());
        root.add_route(&["foo", "bar"], route("/foo/bar"));

        let mut vars = PathVariables::new();
        let hit = root.find_route(&["foo", "bar"], &mut vars).unwrap();
        assert!(Arc::ptr_eq(&hit, &variable));
        assert_eq!(vars.get("x"), Some("bar"));
    }

    #[test]
    fn same_path_re_registration_overwrites() {
        let mut root = Segment::root();
        root.add_route(&["a"], route("/a"));
        let second = route("/a");
        root.add_route(&["a"], second.clone());

        let mut vars = PathVariables::new();
        let hit = root.find_route(&["a"], &mut vars).unwrap();
        assert!(Arc::ptr_eq(&hit, &second));
    }

    #[test]
    fn case_sensitive_route_propagates_to_new_segments() {
        let mut root = Segment::root();
        root.add_route(&["Admin"], case_sensitive_route("/Admin"));

        let mut vars = PathVariables::new();
        assert!(root.find_route(&["Admin"], &mut vars).is_some());
        assert!(root.find_route(&["admin"], &mut vars).is_none());
    }

    #[test]
    fn path_variables_preserve_insertion_order() {
        let mut vars = PathVariables::new();
        vars.insert("b", "2");
        vars.insert("a", "1");
        let order: Vec<&str> = vars.iter().map(|(n, _)| n).collect();
        assert_eq!(order, vec!["b", "a"]);
        assert_eq!(vars.len(), 2);
    }

    #[test]
    fn template_variables_flatten_across_tokens() {
        assert_eq!(
            template_variables(&["users", "{id}", "posts", "{post?}"]),
            vec!["id".to_string(), "post".to_string()]
        );
    }
}
