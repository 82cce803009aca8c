// Mlog - core/classify.rs
//
// Path classifier: a declared, ordered table of glob patterns, each mapped to
// a tagged parser variant. The first matching rule wins; a path matching no
// rule has no parser and its lines are ignored (never an error).
//
// Patterns are matched against the whole path with default glob options, so
// `*` also crosses `/`. `*/nginx/access.log*` therefore matches both
// `/var/log/nginx/access.log` and `/srv/x/nginx/access.log.1`.
//
// Classification happens once per registered path (see app::watcher), not
// per line.

use crate::core::parser::ParserKind;
use glob::Pattern;
use std::path::Path;

/// Built-in rules, in priority order.
pub const BUILTIN_RULES: &[(&str, ParserKind)] = &[
    ("*/var/log/auth.log*", ParserKind::Ssh),
    ("*/var/log/secure*", ParserKind::Ssh),
    ("*/nginx/access.log*", ParserKind::NginxAccess),
    ("*/nginx/error.log*", ParserKind::NginxError),
    ("*/apache2/access.log*", ParserKind::ApacheAccess),
    ("*/httpd/access_log*", ParserKind::ApacheAccess),
    ("*/apache2/error.log*", ParserKind::ApacheError),
    ("*/httpd/error_log*", ParserKind::ApacheError),
    ("*/.pm2/logs/*", ParserKind::Pm2),
    ("*pm2.log*", ParserKind::Pm2),
];

/// One row of the classifier table.
#[derive(Debug, Clone)]
pub struct ClassifierRule {
    pub pattern: Pattern,
    pub kind: ParserKind,
}

impl ClassifierRule {
    pub fn new(pattern: &str, kind: ParserKind) -> Result<Self, glob::PatternError> {
        Ok(Self {
            pattern: Pattern::new(pattern)?,
            kind,
        })
    }

    /// Rule matching exactly one literal path (glob metacharacters escaped).
    pub fn exact(path: &Path, kind: ParserKind) -> Self {
        Self::literal_prefix(path, "", kind)
    }

    /// Rule matching every file directly or indirectly below `dir`.
    pub fn under_dir(dir: &Path, kind: ParserKind) -> Self {
        Self::literal_prefix(dir, "/*", kind)
    }

    fn literal_prefix(path: &Path, suffix: &str, kind: ParserKind) -> Self {
        let escaped = Pattern::escape(&normalise(path));
        let pattern = Pattern::new(&format!("{}{suffix}", escaped.trim_end_matches('/')))
            .expect("escaped glob pattern");
        Self { pattern, kind }
    }

    pub fn matches(&self, path: &Path) -> bool {
        self.pattern.matches(&normalise(path))
    }
}

/// Ordered classifier table.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<ClassifierRule>,
}

impl Classifier {
    /// The built-in table only.
    pub fn builtin() -> Self {
        Self::with_rules(Vec::new())
    }

    /// User rules first, then the built-in table.
    pub fn with_rules(user_rules: Vec<ClassifierRule>) -> Self {
        let mut rules = user_rules;
        rules.extend(BUILTIN_RULES.iter().map(|(pat, kind)| {
            ClassifierRule::new(pat, *kind).expect("built-in classifier pattern")
        }));
        Self { rules }
    }

    /// Parser for `path`, or None if no rule matches.
    pub fn classify(&self, path: &Path) -> Option<ParserKind> {
        self.rules
            .iter()
            .find(|rule| rule.matches(path))
            .map(|rule| rule.kind)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Forward slashes only, so patterns work on Windows paths too.
fn normalise(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
