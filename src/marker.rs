//! Marker comments that request an automated edit.
//!
//! A marker is a line comment token followed by the marker token, e.g.
//! `// @markwatch rename this to parse_header`. Everything after the token on
//! the same line is the instruction.

use std::fmt;

/// The literal patterns that trigger a dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerSet {
    patterns: Vec<String>,
}

/// First marker found in a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerMatch {
    /// Pattern that matched, e.g. `# @markwatch`.
    pub pattern: String,
    /// Text after the pattern on the same line, trimmed. May be empty.
    pub instruction: String,
    /// 1-based line number.
    pub line: usize,
}

impl MarkerSet {
    /// Build patterns `"<prefix> <token>"` for every comment prefix.
    pub fn new(token: &str, comment_prefixes: &[&str]) -> Self {
        let token = token.trim();
        let mut patterns: Vec<String> = Vec::with_capacity(comment_prefixes.len());
        for prefix in comment_prefixes {
            let pattern = format!("{} {token}", prefix.trim());
            if !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
        }
        Self { patterns }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// Locate the first marker, scanning line by line.
    pub fn find(&self, content: &str) -> Option<MarkerMatch> {
        for (idx, line) in content.lines().enumerate() {
            // Earliest pattern on the line wins so `# // @x` style lines are stable.
            let hit = self
                .patterns
                .iter()
                .filter_map(|p| line.find(p.as_str()).map(|pos| (pos, p)))
                .min_by_key(|(pos, _)| *pos);

            if let Some((pos, pattern)) = hit {
                let rest = &line[pos + pattern.len()..];
                let instruction = rest.trim_start().trim_start_matches(':').trim();
                return Some(MarkerMatch {
                    pattern: pattern.clone(),
                    instruction: instruction.to_string(),
                    line: idx + 1,
                });
            }
        }
        None
    }
}

impl Default for MarkerSet {
    fn default() -> Self {
        Self::new("@markwatch", &["#", "//"])
    }
}

impl fmt::Display for MarkerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.patterns.join(", "))
    }
}
