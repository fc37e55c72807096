use crate::dictionary::CompiledDictionary;
use crate::dom::{Document, NodeId};
use crate::ledger::OriginalTextLedger;
use crate::substitute::Mode;

pub const DEFAULT_SKIP_ELEMENTS: [&str; 2] = ["script", "style"];

/// Marker that makes displayed text look already annotated.
const ANNOTATION_OPEN: char = '(';

/// Everything one pass needs besides the document itself.
pub struct SweepContext<'a> {
    pub dict: &'a CompiledDictionary,
    pub ledger: &'a mut OriginalTextLedger,
    pub mode: Mode,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub visited: usize,
    pub written: usize,
}

impl SweepStats {
    fn add(&mut self, other: SweepStats) {
        self.visited += other.visited;
        self.written += other.written;
    }
}

/// Applies substitution to the rendered text nodes of a subtree.
#[derive(Clone, Debug)]
pub struct Sweeper {
    skip_elements: Vec<String>,
}

impl Default for Sweeper {
    fn default() -> Self {
        Self::new(DEFAULT_SKIP_ELEMENTS.iter().map(|s| s.to_string()).collect())
    }
}

impl Sweeper {
    /// `skip_elements` name containers whose text is never rendered (matched case-insensitively).
    #[must_use]
    pub fn new(skip_elements: Vec<String>) -> Self {
        Self { skip_elements }
    }

    /// Translates every renderable text node under `root` (or `root` itself).
    pub fn sweep(&self, doc: &mut Document, root: NodeId, cx: &mut SweepContext<'_>) -> SweepStats {
        let mut stats = SweepStats::default();
        if doc.is_text(root) {
            if self.is_renderable(doc, root) {
                stats.add(self.process_text_node(doc, root, cx));
            }
            return stats;
        }
        if !doc.contains(root) || self.in_skipped_container(doc, root) {
            return stats;
        }
        // Collect first: writes below must not disturb the walk.
        for id in self.text_nodes(doc, root) {
            stats.add(self.process_text_node(doc, id, cx));
        }
        stats
    }

    /// Any single node: text gets the per-node step, anything else a subtree sweep.
    /// Freed ids are ignored.
    pub fn process_node(&self, doc: &mut Document, id: NodeId, cx: &mut SweepContext<'_>) -> SweepStats {
        if !doc.contains(id) {
            return SweepStats::default();
        }
        self.sweep(doc, id, cx)
    }

    /// Per-node translate/restore step.
    ///
    /// The translation is always computed from the remembered original. Displayed text
    /// containing `(` is treated as possibly annotated already, so the ledger value is
    /// trusted over the live text; plain parentheses in source text trip this too.
    pub fn process_text_node(&self, doc: &mut Document, id: NodeId, cx: &mut SweepContext<'_>) -> SweepStats {
        let Some(current) = doc.text(id) else {
            return SweepStats::default();
        };
        let original = cx.ledger.original_of(id, current).to_string();

        let next = if cx.mode == Mode::Restore {
            original
        } else {
            let seed = if current.contains(ANNOTATION_OPEN) {
                original.as_str()
            } else {
                current
            };
            cx.ledger.remember(id, seed);
            cx.dict.substitute(&original, cx.mode).into_owned()
        };

        let mut stats = SweepStats {
            visited: 1,
            written: 0,
        };
        if doc.text(id) != Some(next.as_str()) {
            match doc.set_text(id, next) {
                Ok(()) => stats.written = 1,
                Err(err) => log::warn!("skipping text node: {err:#}"),
            }
        }
        stats
    }

    /// Whether a text node would be shown: no ancestor is a skipped container.
    #[must_use]
    pub fn is_renderable(&self, doc: &Document, id: NodeId) -> bool {
        doc.contains(id) && !self.in_skipped_container(doc, id)
    }

    /// Renderable text nodes under `root`, depth-first in document order.
    #[must_use]
    pub fn text_nodes(&self, doc: &Document, root: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if doc.is_text(id) {
                out.push(id);
                continue;
            }
            if self.is_skipped(doc, id) {
                continue;
            }
            stack.extend(doc.children(id).iter().rev().copied());
        }
        out
    }

    fn in_skipped_container(&self, doc: &Document, id: NodeId) -> bool {
        let mut cur = Some(id);
        while let Some(node) = cur {
            if self.is_skipped(doc, node) {
                return true;
            }
            cur = doc.parent(node);
        }
        false
    }

    fn is_skipped(&self, doc: &Document, id: NodeId) -> bool {
        doc.element_name(id)
            .is_some_and(|name| self.skip_elements.iter().any(|s| s.eq_ignore_ascii_case(name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dictionary::TermDictionary;
    use crate::dom::parse_xhtml;

    fn dict(pairs: &[(&str, &str)]) -> CompiledDictionary {
        CompiledDictionary::compile(pairs.iter().copied().collect::<TermDictionary>())
    }

    fn run(doc: &mut Document, dict: &CompiledDictionary, ledger: &mut OriginalTextLedger, mode: Mode) -> SweepStats {
        let root = doc.root();
        let mut cx = SweepContext { dict, ledger, mode };
        Sweeper::default().sweep(doc, root, &mut cx)
    }

    #[test]
    fn translate_then_restore_recovers_original() {
        let d = dict(&[("Gandalf", "甘道夫"), ("Frodo", "佛罗多")]);
        let mut doc = parse_xhtml("<div><p>Gandalf arrives</p><p>Frodo (hobbit) waits</p></div>").expect("parse");
        let before = doc.text_content(doc.root());
        let mut ledger = OriginalTextLedger::new();

        for mode in [Mode::SourceOnly, Mode::Annotated, Mode::SourceOnly, Mode::Annotated, Mode::Annotated] {
            run(&mut doc, &d, &mut ledger, mode);
        }
        run(&mut doc, &d, &mut ledger, Mode::Restore);
        assert_eq!(doc.text_content(doc.root()), before);
    }

    #[test]
    fn annotated_sweep_does_not_compound() {
        let d = dict(&[("Gandalf", "甘道夫")]);
        let mut doc = parse_xhtml("<p>Gandalf arrives</p>").expect("parse");
        let mut ledger = OriginalTextLedger::new();
        run(&mut doc, &d, &mut ledger, Mode::Annotated);
        run(&mut doc, &d, &mut ledger, Mode::Annotated);
        assert_eq!(doc.text_content(doc.root()), "Gandalf (甘道夫) arrives");
    }

    #[test]
    fn skips_script_and_style() {
        let d = dict(&[("Gandalf", "甘道夫")]);
        let mut doc = parse_xhtml(
            "<div><script>var Gandalf = 1;</script><style>.Gandalf{}</style><p>Gandalf</p></div>",
        )
        .expect("parse");
        let mut ledger = OriginalTextLedger::new();
        let stats = run(&mut doc, &d, &mut ledger, Mode::SourceOnly);
        assert_eq!(stats, SweepStats { visited: 1, written: 1 });
        assert_eq!(doc.text_content(doc.root()), "var Gandalf = 1;.Gandalf{}甘道夫");
    }

    #[test]
    fn writes_only_on_change() {
        let d = dict(&[("Gandalf", "甘道夫")]);
        let mut doc = parse_xhtml("<p>nothing here</p><p>Gandalf</p>").expect("parse");
        let mut ledger = OriginalTextLedger::new();
        doc.observe();
        let stats = run(&mut doc, &d, &mut ledger, Mode::SourceOnly);
        assert_eq!(stats, SweepStats { visited: 2, written: 1 });
        assert_eq!(doc.pending_records(), 1);

        let again = run(&mut doc, &d, &mut ledger, Mode::SourceOnly);
        assert_eq!(again.written, 0);
    }

    #[test]
    fn restore_without_original_is_a_no_op() {
        let d = dict(&[("Gandalf", "甘道夫")]);
        let mut doc = parse_xhtml("<p>Gandalf</p>").expect("parse");
        let mut ledger = OriginalTextLedger::new();
        let stats = run(&mut doc, &d, &mut ledger, Mode::Restore);
        assert_eq!(stats.written, 0);
        assert!(ledger.is_empty());
        assert_eq!(doc.text_content(doc.root()), "Gandalf");
    }

    #[test]
    fn process_node_ignores_freed_ids() {
        let d = dict(&[("Gandalf", "甘道夫")]);
        let mut doc = parse_xhtml("<div><p>Gandalf</p></div>").expect("parse");
        let div = doc.find_element(doc.root(), "div").expect("div");
        let p = doc.find_element(div, "p").expect("p");
        doc.remove_child(div, p).expect("remove");
        let mut ledger = OriginalTextLedger::new();
        let mut cx = SweepContext {
            dict: &d,
            ledger: &mut ledger,
            mode: Mode::SourceOnly,
        };
        assert_eq!(Sweeper::default().process_node(&mut doc, p, &mut cx), SweepStats::default());
    }

    #[test]
    fn text_root_inside_script_is_ignored() {
        let d = dict(&[("Gandalf", "甘道夫")]);
        let mut doc = parse_xhtml("<script>Gandalf</script>").expect("parse");
        let script = doc.find_element(doc.root(), "script").expect("script");
        let text = doc.children(script)[0];
        let mut ledger = OriginalTextLedger::new();
        let mut cx = SweepContext {
            dict: &d,
            ledger: &mut ledger,
            mode: Mode::SourceOnly,
        };
        let stats = Sweeper::default().sweep(&mut doc, text, &mut cx);
        assert_eq!(stats.visited, 0);
    }
}
