use crate::dom::{Document, MutationRecord, NodeId};
use crate::sweep::{SweepContext, SweepStats, Sweeper};

/// Upper bound on records handled in one drain; engine writes converge long before this.
const MAX_RECORDS_PER_DRAIN: usize = 1 << 20;

/// Keeps inserted or edited text in step with the current mode.
///
/// Records are handled one at a time in arrival order, each to completion. Writes made
/// while handling a record queue records of their own; those are handled in the same
/// drain and produce no further writes because the computed text no longer differs.
/// Only nodes under the watched root are touched; records elsewhere are dropped.
#[derive(Debug, Default)]
pub struct MutationWatcher {
    root: Option<NodeId>,
}

impl MutationWatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts watching the subtree at `root`. A second install keeps the first root.
    pub fn install(&mut self, doc: &mut Document, root: NodeId) {
        if self.root.is_none() {
            doc.observe();
            self.root = Some(root);
        }
    }

    pub fn uninstall(&mut self, doc: &mut Document) {
        if self.root.take().is_some() {
            doc.disconnect();
        }
    }

    #[must_use]
    pub fn is_installed(&self) -> bool {
        self.root.is_some()
    }

    /// Handles every pending record, then prunes ledger entries of freed nodes.
    pub fn drain(&mut self, doc: &mut Document, sweeper: &Sweeper, cx: &mut SweepContext<'_>) -> SweepStats {
        let mut stats = SweepStats::default();
        let Some(root) = self.root else {
            return stats;
        };
        let mut handled = 0usize;
        while let Some(rec) = doc.take_record() {
            handled += 1;
            if handled > MAX_RECORDS_PER_DRAIN {
                log::warn!("mutation drain did not settle; dropping {} records", doc.pending_records() + 1);
                while doc.take_record().is_some() {}
                break;
            }
            let s = Self::handle(doc, root, sweeper, cx, rec);
            stats.visited += s.visited;
            stats.written += s.written;
        }
        let pruned = cx.ledger.retain_live(doc);
        if pruned > 0 {
            log::debug!("pruned {pruned} ledger entries of removed nodes");
        }
        stats
    }

    fn handle(
        doc: &mut Document,
        root: NodeId,
        sweeper: &Sweeper,
        cx: &mut SweepContext<'_>,
        rec: MutationRecord,
    ) -> SweepStats {
        match rec {
            MutationRecord::ChildList { added, .. } => {
                let mut stats = SweepStats::default();
                for id in added {
                    // Added nodes may have been moved or freed by a later record.
                    if !doc.is_within(id, root) {
                        continue;
                    }
                    let s = sweeper.process_node(doc, id, cx);
                    stats.visited += s.visited;
                    stats.written += s.written;
                }
                stats
            }
            MutationRecord::CharacterData { target } => {
                if doc.is_text(target) && doc.is_within(target, root) && sweeper.is_renderable(doc, target) {
                    sweeper.process_text_node(doc, target, cx)
                } else {
                    SweepStats::default()
                }
            }
        }
    }
}
