use std::collections::{BTreeSet, HashMap};

/// Tracks outstanding offsets per partition so a consumer only commits past messages
/// that were all acknowledged.
///
/// Kafka commits are cumulative: committing offset `n` acknowledges everything below
/// it. Messages are acknowledged out of order here (decode failures right away, window
/// members after their flush), so the committable offset is the lowest one still
/// outstanding.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<i32, PartitionOffsets>,
}

#[derive(Debug, Default)]
struct PartitionOffsets {
    outstanding: BTreeSet<i64>,
    next: i64,
    committed: Option<i64>,
}

impl OffsetTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn received(&mut self, partition: i32, offset: i64) {
        let p = self.partitions.entry(partition).or_default();
        p.outstanding.insert(offset);
        p.next = p.next.max(offset + 1);
    }

    pub fn acked(&mut self, partition: i32, offset: i64) {
        if let Some(p) = self.partitions.get_mut(&partition) {
            p.outstanding.remove(&offset);
        }
    }

    /// Offsets to commit, one per partition whose commit point moved since last call.
    pub fn commit_points(&mut self) -> Vec<(i32, i64)> {
        let mut out = Vec::new();
        for (&partition, p) in self.partitions.iter_mut() {
            let point = p.outstanding.first().copied().unwrap_or(p.next);
            if p.committed.map_or(true, |c| point > c) {
                p.committed = Some(point);
                out.push((partition, point));
            }
        }
        out.sort_unstable();
        out
    }
}

/// Parses the `partition@offset` ids handed out by the Kafka source.
pub fn parse_id(id: &str) -> Option<(i32, i64)> {
    let (p, o) = id.split_once('@')?;
    Some((p.parse().ok()?, o.parse().ok()?))
}
