//! Save-Point Index (§4.5): an exponentially-spaced reverse-index into the
//! op log, so an out-of-order insertion only has to rewind and replay back
//! to the nearest save point rather than from the very beginning.

use crate::config::MIN_SAVE_POINT_SIZE;
use crate::id::Timestamp;
use crate::idmap::IdMappedJson;

/// A full snapshot of the document at the moment the op with `timestamp`
/// was applied. `width` is the number of ops this save point "covers"
/// toward the previous one, always a power of two.
#[derive(Debug, Clone)]
pub struct SavePoint {
    pub timestamp: Timestamp,
    pub width: u32,
    pub state: IdMappedJson,
}

/// Oldest-to-newest list of save points. Always non-empty: `points[0]` is
/// the zero save point `(ts = Timestamp::zero(), width = MIN_SAVE_POINT_SIZE)`
/// covering the empty document, which guarantees every timestamp has some
/// covering save point to rewind to.
#[derive(Debug, Clone)]
pub struct SavePointIndex {
    points: Vec<SavePoint>,
    ops_since_last: u32,
}

impl SavePointIndex {
    pub fn new(empty_state: IdMappedJson) -> Self {
        SavePointIndex {
            points: vec![SavePoint {
                timestamp: Timestamp::zero(),
                width: MIN_SAVE_POINT_SIZE as u32,
                state: empty_state,
            }],
            ops_since_last: 0,
        }
    }

    pub fn points(&self) -> &[SavePoint] {
        &self.points
    }

    pub fn latest(&self) -> &SavePoint {
        self.points.last().expect("save points are never empty")
    }

    /// Call once after an op is applied. `snapshot` is only invoked (and
    /// the state it builds only cloned) when a new save point is actually
    /// due, per the policy in §4.5:
    ///
    /// 1. If fewer than `MIN_SAVE_POINT_SIZE` ops have accumulated since
    ///    the last save point, do nothing.
    /// 2. Otherwise, scan the existing list for the first run of three
    ///    consecutive equal widths; if found, drop the middle one and
    ///    double the first's width.
    /// 3. Append a new save point of width `MIN_SAVE_POINT_SIZE` at the
    ///    latest op's timestamp.
    pub fn maybe_snapshot(
        &mut self,
        latest_ts: Timestamp,
        snapshot: impl FnOnce() -> IdMappedJson,
    ) -> SnapshotEvent {
        self.ops_since_last += 1;
        if self.ops_since_last < MIN_SAVE_POINT_SIZE as u32 {
            return SnapshotEvent::None;
        }
        let collapsed = self.collapse_once();
        self.points.push(SavePoint {
            timestamp: latest_ts,
            width: MIN_SAVE_POINT_SIZE as u32,
            state: snapshot(),
        });
        self.ops_since_last = 0;
        SnapshotEvent::Added { added: latest_ts, collapsed }
    }

    /// Returns the timestamp of the save point removed by the collapse, if
    /// any, so the caller can tell `Persistence::delete_save_point` about it.
    fn collapse_once(&mut self) -> Option<Timestamp> {
        for i in 2..self.points.len() {
            if self.points[i - 2].width == self.points[i - 1].width
                && self.points[i - 1].width == self.points[i].width
            {
                let removed = self.points.remove(i - 1);
                self.points[i - 2].width *= 2;
                return Some(removed.timestamp);
            }
        }
        None
    }

    /// Index of the greatest save point with `timestamp <= ts`. Always
    /// succeeds: the zero save point covers everything.
    pub fn covering_index(&self, ts: Timestamp) -> usize {
        self.points
            .iter()
            .rposition(|sp| sp.timestamp <= ts)
            .unwrap_or(0)
    }

    pub fn covering(&self, ts: Timestamp) -> &SavePoint {
        &self.points[self.covering_index(ts)]
    }

    /// Drops every save point after `index` (used by `mergeOps` when
    /// rewinding to replay from an earlier point). `ops_since_last` resets:
    /// the caller will re-drive `maybe_snapshot` once per replayed op.
    pub fn truncate_after(&mut self, index: usize) {
        self.points.truncate(index + 1);
        self.ops_since_last = 0;
    }

    /// Drops save points strictly older than `index`, keeping at least the
    /// zero save point's invariant role by re-rooting `points[0]` at the
    /// oldest retained entry. Used by history compaction.
    pub fn drop_before(&mut self, index: usize) {
        if index == 0 {
            return;
        }
        self.points.drain(0..index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Uuid;
    use serde_json::json;

    fn empty() -> IdMappedJson {
        IdMappedJson::new(json!({}))
    }

    fn ts(author: &Uuid, i: u32) -> Timestamp {
        Timestamp::new(*author, i)
    }

    #[test]
    fn widths_follow_the_doubling_and_collapse_rule() {
        let mut idx = SavePointIndex::new(empty());
        let author = Uuid::new();
        for i in 1..=16u32 {
            idx.maybe_snapshot(ts(&author, i), empty);
        }
        let widths: Vec<u32> = idx.points().iter().map(|sp| sp.width).collect();
        assert_eq!(widths, vec![8, 4, 4, 4]);
    }

    #[test]
    fn fewer_than_min_size_ops_produce_no_new_save_point() {
        let mut idx = SavePointIndex::new(empty());
        let author = Uuid::new();
        for i in 1..=3u32 {
            idx.maybe_snapshot(ts(&author, i), empty);
        }
        assert_eq!(idx.points().len(), 1);
    }

    #[test]
    fn covering_finds_the_greatest_save_point_at_or_before_ts() {
        let mut idx = SavePointIndex::new(empty());
        let author = Uuid::new();
        for i in 1..=8u32 {
            idx.maybe_snapshot(ts(&author, i), empty);
        }
        let covering = idx.covering(ts(&author, 5));
        assert_eq!(covering.timestamp, ts(&author, 4));
    }
}
