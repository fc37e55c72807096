use std::collections::HashMap;

use crate::dictionary::TermDictionary;

pub const DEFAULT_SUGGESTIONS: usize = 5;

/// Two-way card-name table: target names resolve to source names and source names to
/// target names.
#[derive(Clone, Debug, Default)]
pub struct CardNameIndex {
    map: HashMap<String, String>,
    names: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BatchOutcome {
    pub text: String,
    /// False when no line contained a known name.
    pub changed: bool,
}

impl CardNameIndex {
    /// Source-to-target entries win when a name appears on both sides.
    #[must_use]
    pub fn from_dictionary(terms: &TermDictionary) -> Self {
        let mut index = Self::default();
        for (src, tgt) in terms.iter() {
            index.insert(tgt, src);
        }
        for (src, tgt) in terms.iter() {
            index.insert(src, tgt);
        }
        index
    }

    fn insert(&mut self, from: &str, to: &str) {
        if self.map.insert(from.to_string(), to.to_string()).is_none() {
            self.names.push(from.to_string());
        }
    }

    /// Known names, in first-insertion order.
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    #[must_use]
    pub fn lookup(&self, query: &str) -> Option<&str> {
        let q = query.trim();
        if q.is_empty() {
            return None;
        }
        self.map.get(q).map(String::as_str)
    }

    /// Names containing `query`, at most `limit` of them.
    #[must_use]
    pub fn suggest(&self, query: &str, limit: usize) -> Vec<&str> {
        let q = query.trim();
        if q.is_empty() {
            return Vec::new();
        }
        self.names
            .iter()
            .filter(|n| n.contains(q))
            .take(limit)
            .map(String::as_str)
            .collect()
    }

    /// Translates every whitespace-delimited name on each non-blank line, longest names
    /// first. Replacements are parked behind placeholders so a translated name is never
    /// matched again.
    #[must_use]
    pub fn batch_translate(&self, input: &str) -> BatchOutcome {
        let input = input.trim();
        let mut by_len: Vec<&str> = self.names.iter().map(String::as_str).collect();
        by_len.sort_by(|a, b| b.chars().count().cmp(&a.chars().count()));

        let lines: Vec<String> = input
            .split('\n')
            .filter(|l| !l.trim().is_empty())
            .map(|line| self.translate_line(line, &by_len))
            .collect();
        let text = lines.join("\n");
        let changed = text.trim() != input;
        BatchOutcome { text, changed }
    }

    fn translate_line(&self, line: &str, by_len: &[&str]) -> String {
        let mut work = line.to_string();
        let mut parked: Vec<(String, &str)> = Vec::new();
        for (idx, name) in by_len.iter().enumerate() {
            if !work.contains(name) {
                continue;
            }
            let placeholder = format!("\u{E000}{idx}\u{E001}");
            if let Some(next) = replace_delimited(&work, name, &placeholder) {
                work = next;
                if let Some(target) = self.map.get(*name) {
                    parked.push((placeholder, target));
                }
            }
        }
        for (placeholder, target) in parked {
            work = work.replace(&placeholder, target);
        }
        work
    }
}

/// Replaces occurrences of `needle` that have whitespace or a line edge on both sides.
/// `None` when there were none.
fn replace_delimited(hay: &str, needle: &str, with: &str) -> Option<String> {
    if needle.is_empty() {
        return None;
    }
    let mut out = String::with_capacity(hay.len());
    let mut last = 0;
    let mut pos = 0;
    let mut hit = false;
    while let Some(off) = hay[pos..].find(needle) {
        let start = pos + off;
        let end = start + needle.len();
        let before_ok = hay[..start].chars().next_back().map_or(true, char::is_whitespace);
        let after_ok = hay[end..].chars().next().map_or(true, char::is_whitespace);
        if before_ok && after_ok {
            out.push_str(&hay[last..start]);
            out.push_str(with);
            last = end;
            pos = end;
            hit = true;
        } else {
            pos = start + hay[start..].chars().next().map_or(1, char::len_utf8);
        }
        if pos >= hay.len() {
            break;
        }
    }
    if !hit {
        return None;
    }
    out.push_str(&hay[last..]);
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> CardNameIndex {
        CardNameIndex::from_dictionary(
            &[
                ("Aragorn", "亚拉冈"),
                ("Gandalf", "甘道夫"),
                ("Steward of Gondor", "刚铎宰相"),
                ("Gondor", "刚铎"),
            ]
            .into_iter()
            .collect(),
        )
    }

    #[test]
    fn lookup_goes_both_ways() {
        let idx = index();
        assert_eq!(idx.lookup("  亚拉冈 "), Some("Aragorn"));
        assert_eq!(idx.lookup("Aragorn"), Some("亚拉冈"));
        assert_eq!(idx.lookup(""), None);
        assert_eq!(idx.lookup("Legolas"), None);
        assert_eq!(idx.len(), 8);
    }

    #[test]
    fn source_direction_wins_on_collision() {
        let idx = CardNameIndex::from_dictionary(&[("Gondor", "Rohan"), ("Rohan", "洛汗")].into_iter().collect());
        assert_eq!(idx.lookup("Rohan"), Some("洛汗"));
        assert_eq!(idx.lookup("Gondor"), Some("Rohan"));
    }

    #[test]
    fn suggest_is_limited_and_ordered() {
        let idx = index();
        assert_eq!(idx.suggest("刚铎", DEFAULT_SUGGESTIONS), vec!["刚铎宰相", "刚铎"]);
        assert_eq!(idx.suggest("o", 2), vec!["Aragorn", "Steward of Gondor"]);
        assert!(idx.suggest("  ", DEFAULT_SUGGESTIONS).is_empty());
    }

    #[test]
    fn batch_prefers_longest_delimited_names() {
        let idx = index();
        let out = idx.batch_translate("3x 刚铎宰相\n\n  \n2x 刚铎\n1x 甘道夫的\n");
        assert_eq!(out.text, "3x Steward of Gondor\n2x Gondor\n1x 甘道夫的");
        assert!(out.changed);
    }

    #[test]
    fn translated_names_are_not_retranslated() {
        let idx = CardNameIndex::from_dictionary(&[("Gondor", "刚铎")].into_iter().collect());
        let out = idx.batch_translate("刚铎 Gondor");
        assert_eq!(out.text, "Gondor 刚铎");
    }

    #[test]
    fn unchanged_batch_is_reported() {
        let out = index().batch_translate("1x Legolas\n");
        assert_eq!(out.text, "1x Legolas");
        assert!(!out.changed);
    }

    #[test]
    fn delimited_replace_checks_both_edges() {
        assert_eq!(replace_delimited("ab a ba a", "a", "X"), Some("ab X ba X".to_string()));
        assert_eq!(replace_delimited("aa", "a", "X"), None);
    }
}
