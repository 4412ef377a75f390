// Filter saliency ranking
//
// For every filter of the target convolution (one [C_in, k, k] weight
// block), the dequantized weights give three norms:
//
//   L1      = Σ |w|
//   L2      = sqrt(Σ w²)           ← the saliency key
//   max_abs = max |w|
//
// Records are kept in a `SaliencyRanking`, a Vec sorted by ascending
// saliency. A new record goes after every existing record whose score is
// less than or equal to its own, so equal scores keep insertion order.
// Insertion is O(F), O(F²) for a whole layer, which is fine for the tens of
// filters a layer has.
//
// Selection consumes the ranking: once the kept filters are known the
// records are gone.

use serde::{Deserialize, Serialize};

use sprig_core::{Error, FixedTensor, QFormat, Result};

/// Norms of one filter's dequantized weight block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilterNorms {
    pub index: usize,
    pub l1: f32,
    pub l2: f32,
    pub max_abs: f32,
}

impl FilterNorms {
    pub fn of(index: usize, block: &[i8], q: QFormat) -> Self {
        let mut l1 = 0.0f32;
        let mut sq = 0.0f32;
        let mut max_abs = 0.0f32;
        for &v in block {
            let w = q.dequantize(v).abs();
            l1 += w;
            sq += w * w;
            max_abs = max_abs.max(w);
        }
        FilterNorms {
            index,
            l1,
            l2: sq.sqrt(),
            max_abs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterRecord {
    pub index: usize,
    pub saliency: f32,
}

/// Which end of the ranking survives pruning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepPolicy {
    /// Keep the N most salient filters.
    #[default]
    Highest,
    /// Keep the N least salient filters (front-of-list consumption).
    Lowest,
}

/// Filter records in ascending saliency order.
#[derive(Debug, Clone, Default)]
pub struct SaliencyRanking {
    records: Vec<FilterRecord>,
}

impl SaliencyRanking {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        SaliencyRanking {
            records: Vec::with_capacity(n),
        }
    }

    pub fn insert(&mut self, record: FilterRecord) {
        let at = self
            .records
            .partition_point(|r| r.saliency <= record.saliency);
        self.records.insert(at, record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[FilterRecord] {
        &self.records
    }

    pub fn is_sorted(&self) -> bool {
        self.records
            .windows(2)
            .all(|w| w[0].saliency <= w[1].saliency)
    }

    /// Take `n` records from the end chosen by `policy` and return their
    /// filter indices in ascending index order.
    pub fn select(self, n: usize, policy: KeepPolicy) -> Result<Vec<usize>> {
        let available = self.records.len();
        if n > available {
            return Err(Error::RankingExhausted {
                requested: n,
                available,
            });
        }
        let chosen = match policy {
            KeepPolicy::Highest => &self.records[available - n..],
            KeepPolicy::Lowest => &self.records[..n],
        };
        let mut kept: Vec<usize> = chosen.iter().map(|r| r.index).collect();
        kept.sort_unstable();
        Ok(kept)
    }
}

/// Score every filter of `weight` (`[F, C_in, k, k]`) by L2 norm.
pub fn rank_filters(weight: &FixedTensor<i8>) -> (SaliencyRanking, Vec<FilterNorms>) {
    let filters = weight.outer_count();
    let mut ranking = SaliencyRanking::with_capacity(filters);
    let mut norms = Vec::with_capacity(filters);
    for i in 0..filters {
        let n = FilterNorms::of(i, weight.outer_slice(i), weight.q());
        tracing::debug!(
            filter = i,
            l1 = n.l1,
            l2 = n.l2,
            max_abs = n.max_abs,
            "filter norms"
        );
        ranking.insert(FilterRecord {
            index: i,
            saliency: n.l2,
        });
        norms.push(n);
    }
    (ranking, norms)
}
