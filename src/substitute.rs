use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::dictionary::CompiledDictionary;

/// Display state of translated text.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    /// Matched terms are replaced by their target.
    #[default]
    #[serde(rename = "zh_only")]
    SourceOnly,
    /// Matched terms become `source (target)`.
    #[serde(rename = "bilingual")]
    Annotated,
    /// Original text, interception off.
    #[serde(rename = "restore")]
    Restore,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::SourceOnly, Mode::Annotated, Mode::Restore];

    /// Name used in persisted state and in host commands.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::SourceOnly => "zh_only",
            Mode::Annotated => "bilingual",
            Mode::Restore => "restore",
        }
    }

    #[must_use]
    pub fn translates(self) -> bool {
        matches!(self, Mode::SourceOnly | Mode::Annotated)
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "zh_only" | "source-only" | "source_only" => Ok(Mode::SourceOnly),
            "bilingual" | "annotated" => Ok(Mode::Annotated),
            "restore" => Ok(Mode::Restore),
            other => Err(anyhow!("unknown mode: {other}")),
        }
    }
}

impl CompiledDictionary {
    /// Rewrites every dictionary term found in `text` according to `mode`.
    ///
    /// Matches are leftmost-first and non-overlapping; because the pattern lists longer
    /// terms first, a longer term wins over its own prefix at the same position.
    /// Restore mode and an uncompiled dictionary return `text` as is.
    pub fn substitute<'t>(&self, text: &'t str, mode: Mode) -> Cow<'t, str> {
        let Some(re) = self.pattern() else {
            return Cow::Borrowed(text);
        };
        if text.is_empty() || !mode.translates() {
            return Cow::Borrowed(text);
        }
        re.replace_all(text, |caps: &regex::Captures<'_>| {
            let matched = caps.get(0).map(|m| m.as_str()).unwrap_or_default();
            match (self.lookup(matched), mode) {
                (Some(tgt), Mode::SourceOnly) => tgt.to_string(),
                (Some(tgt), Mode::Annotated) => format!("{matched} ({tgt})"),
                _ => matched.to_string(),
            }
        })
    }
}

/// Owned-result form of [`CompiledDictionary::substitute`].
#[must_use]
pub fn substitute(dict: &CompiledDictionary, text: &str, mode: Mode) -> String {
    dict.substitute(text, mode).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::TermDictionary;

    fn dict(pairs: &[(&str, &str)]) -> CompiledDictionary {
        CompiledDictionary::compile(pairs.iter().copied().collect::<TermDictionary>())
    }

    #[test]
    fn text_without_terms_is_unchanged() {
        let d = dict(&[("Gandalf", "甘道夫"), ("ring", "至尊戒")]);
        for mode in Mode::ALL {
            assert_eq!(substitute(&d, "nothing to see here", mode), "nothing to see here");
            assert_eq!(substitute(&d, "", mode), "");
        }
    }

    #[test]
    fn each_term_maps_to_target() {
        let d = dict(&[("Gandalf", "甘道夫"), ("Bilbo Baggins", "比尔博·巴金斯")]);
        assert_eq!(substitute(&d, "Gandalf", Mode::SourceOnly), "甘道夫");
        assert_eq!(substitute(&d, "Gandalf", Mode::Annotated), "Gandalf (甘道夫)");
        assert_eq!(substitute(&d, "Bilbo Baggins", Mode::SourceOnly), "比尔博·巴金斯");
        assert_eq!(
            substitute(&d, "Bilbo Baggins", Mode::Annotated),
            "Bilbo Baggins (比尔博·巴金斯)"
        );
    }

    #[test]
    fn longest_match_wins() {
        let d = dict(&[("ring", "X"), ("ring of power", "Y")]);
        assert_eq!(substitute(&d, "the ring of power", Mode::SourceOnly), "the Y");
        assert_eq!(substitute(&d, "a ring and the ring of power", Mode::SourceOnly), "a X and the Y");
    }

    #[test]
    fn word_boundaries_for_latin_terms() {
        let d = dict(&[("ring", "X")]);
        assert_eq!(substitute(&d, "rings", Mode::SourceOnly), "rings");
        assert_eq!(substitute(&d, "bring", Mode::SourceOnly), "bring");
        assert_eq!(substitute(&d, "ring, ring!", Mode::SourceOnly), "X, X!");
    }

    #[test]
    fn latin_terms_match_next_to_han_text() {
        let d = dict(&[("Gandalf", "甘道夫"), ("ring", "X")]);
        assert_eq!(substitute(&d, "灰袍Gandalf来了", Mode::SourceOnly), "灰袍甘道夫来了");
        assert_eq!(substitute(&d, "灰袍Gandalf来了", Mode::Annotated), "灰袍Gandalf (甘道夫)来了");
        assert_eq!(substitute(&d, "魔戒ring", Mode::SourceOnly), "魔戒X");
        assert_eq!(substitute(&d, "rings来了", Mode::SourceOnly), "rings来了");
    }

    #[test]
    fn non_latin_terms_match_inside_runs() {
        let d = dict(&[("甘道夫", "Gandalf")]);
        assert_eq!(substitute(&d, "灰袍甘道夫来了", Mode::SourceOnly), "灰袍Gandalf来了");
    }

    #[test]
    fn matching_ignores_case_but_keeps_matched_text_in_annotation() {
        let d = dict(&[("Ring", "X")]);
        assert_eq!(substitute(&d, "a RING here", Mode::SourceOnly), "a X here");
        assert_eq!(substitute(&d, "a RING here", Mode::Annotated), "a RING (X) here");
    }

    #[test]
    fn restore_is_identity() {
        let d = dict(&[("Gandalf", "甘道夫")]);
        assert_eq!(substitute(&d, "Gandalf arrives", Mode::Restore), "Gandalf arrives");
    }

    #[test]
    fn empty_dictionary_is_passthrough() {
        let d = CompiledDictionary::empty();
        assert_eq!(substitute(&d, "Gandalf arrives", Mode::SourceOnly), "Gandalf arrives");
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let d = dict(&[("A.B (x)", "ok")]);
        assert_eq!(substitute(&d, "see A.B (x) now", Mode::SourceOnly), "see ok now");
        assert_eq!(substitute(&d, "see AxB (x) now", Mode::SourceOnly), "see AxB (x) now");
    }

    #[test]
    fn mode_names_round_trip() {
        for mode in Mode::ALL {
            assert_eq!(mode.as_str().parse::<Mode>().expect("parse"), mode);
        }
        assert_eq!("annotated".parse::<Mode>().expect("alias"), Mode::Annotated);
        assert!("klingon".parse::<Mode>().is_err());
    }
}
