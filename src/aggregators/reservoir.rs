//! Forward-decaying priority reservoir (Cormode/Shkapenyuk/Srivastava/Xu).
//!
//! Each inserted sample gets a priority `exp(alpha * (t - landmark)) * u`
//! with `u` uniform in (0, 1]; the reservoir keeps the `size` highest
//! priorities in a min-heap and evicts the lowest when full. Because the
//! exponential grows without bound, the landmark is moved forward once an
//! hour and every stored priority is scaled by `exp(-alpha * dt)` so the
//! relative ordering is preserved without overflowing f64.
//!
//! Export layout (stable): `version:u8 = 1`, `pad:u8 = 0`, `count:u32 LE`,
//! `alpha:f64 LE`, `landmark:f64 LE` (unix seconds), then `count` entries of
//! (`value:f64`, `weight:f64`, `priority:f64`), all little-endian.

use super::CombineError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{SystemTime, UNIX_EPOCH};

pub const DEFAULT_SIZE: usize = 1028;
pub const DEFAULT_ALPHA: f64 = 0.015;

const RESCALE_INTERVAL_SECS: f64 = 3600.0;
const EXPORT_VERSION: u8 = 1;
const HEADER_LEN: usize = 1 + 1 + 4 + 8 + 8;
const ENTRY_LEN: usize = 24;

#[derive(Debug, Clone, Copy)]
struct Entry {
    value: f64,
    weight: f64,
    priority: f64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority.total_cmp(&other.priority)
    }
}

#[derive(Debug, Clone)]
pub struct Reservoir {
    size: usize,
    alpha: f64,
    /// Unix seconds the priorities are expressed relative to.
    landmark: f64,
    next_rescale: f64,
    heap: BinaryHeap<Reverse<Entry>>,
    rng: StdRng,
}

impl Reservoir {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic reservoir for tests.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        let now = unix_seconds();
        Reservoir {
            size: DEFAULT_SIZE,
            alpha: DEFAULT_ALPHA,
            landmark: now,
            next_rescale: now + RESCALE_INTERVAL_SECS,
            heap: BinaryHeap::with_capacity(DEFAULT_SIZE + 1),
            rng,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn insert(&mut self, value: f64, weight: f64) {
        self.insert_at(unix_seconds(), value, weight);
    }

    fn insert_at(&mut self, now: f64, value: f64, weight: f64) {
        if now >= self.next_rescale {
            self.rescale(now);
        }
        // (0, 1]: a zero priority would make the sample unevictable noise.
        let u = 1.0 - self.rng.gen::<f64>();
        let priority = (self.alpha * (now - self.landmark)).exp() * u;
        self.push(Entry { value, weight, priority });
    }

    fn push(&mut self, entry: Entry) {
        self.heap.push(Reverse(entry));
        if self.heap.len() > self.size {
            self.heap.pop();
        }
    }

    fn rescale(&mut self, now: f64) {
        let factor = (-self.alpha * (now - self.landmark)).exp();
        let entries: Vec<Entry> = self.heap.drain().map(|Reverse(e)| e).collect();
        for mut entry in entries {
            entry.priority *= factor;
            self.heap.push(Reverse(entry));
        }
        self.landmark = now;
        self.next_rescale = now + RESCALE_INTERVAL_SECS;
    }

    /// Weighted quantile over the sampled values.
    ///
    /// The sorted samples are treated as adjacent mass ranges: the lower
    /// bound starts at the observed minimum, each sample's upper bound is the
    /// midpoint to the next value (the maximum for the last), and the target
    /// mass `q * total_weight` is interpolated linearly inside the range that
    /// owns it. Returns NaN on an empty reservoir.
    pub fn quantile(&self, q: f64) -> f64 {
        let mut entries: Vec<&Entry> = self.heap.iter().map(|Reverse(e)| e).collect();
        if entries.is_empty() {
            return f64::NAN;
        }
        entries.sort_unstable_by(|a, b| a.value.total_cmp(&b.value));

        let total: f64 = entries.iter().map(|e| e.weight).sum();
        let target = q.clamp(0.0, 1.0) * total;
        let max = entries[entries.len() - 1].value;

        let mut lower = entries[0].value;
        let mut seen = 0.0;
        for (i, entry) in entries.iter().enumerate() {
            let upper = if i + 1 < entries.len() {
                (entry.value + entries[i + 1].value) / 2.0
            } else {
                max
            };
            if target <= seen + entry.weight {
                let fraction = (target - seen) / entry.weight;
                return lower + fraction * (upper - lower);
            }
            seen += entry.weight;
            lower = upper;
        }
        max
    }

    pub fn export(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.heap.len() * ENTRY_LEN);
        out.push(EXPORT_VERSION);
        out.push(0);
        out.extend_from_slice(&(self.heap.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.alpha.to_le_bytes());
        out.extend_from_slice(&self.landmark.to_le_bytes());
        for Reverse(entry) in self.heap.iter() {
            out.extend_from_slice(&entry.value.to_le_bytes());
            out.extend_from_slice(&entry.weight.to_le_bytes());
            out.extend_from_slice(&entry.priority.to_le_bytes());
        }
        out
    }

    /// Merges an exported reservoir. Incoming priorities are re-expressed
    /// relative to the local landmark, then compete normally for the
    /// top-`size` slots.
    pub fn combine(&mut self, snapshot: &[u8]) -> Result<(), CombineError> {
        if snapshot.len() < HEADER_LEN {
            return Err(CombineError::Truncated {
                expected: HEADER_LEN,
                got: snapshot.len(),
            });
        }
        if snapshot[0] != EXPORT_VERSION {
            return Err(CombineError::Version(snapshot[0]));
        }
        let count = u32::from_le_bytes(snapshot[2..6].try_into().unwrap()) as usize;
        let alpha = f64::from_le_bytes(snapshot[6..14].try_into().unwrap());
        let landmark = f64::from_le_bytes(snapshot[14..22].try_into().unwrap());
        if alpha != self.alpha {
            return Err(CombineError::ParameterMismatch(format!(
                "alpha {} != {}",
                alpha, self.alpha
            )));
        }
        let expected = HEADER_LEN + count * ENTRY_LEN;
        if snapshot.len() != expected {
            return Err(CombineError::Truncated {
                expected,
                got: snapshot.len(),
            });
        }

        let rescale = (-self.alpha * (self.landmark - landmark)).exp();
        for chunk in snapshot[HEADER_LEN..].chunks_exact(ENTRY_LEN) {
            let value = f64::from_le_bytes(chunk[0..8].try_into().unwrap());
            let weight = f64::from_le_bytes(chunk[8..16].try_into().unwrap());
            let priority = f64::from_le_bytes(chunk[16..24].try_into().unwrap());
            self.push(Entry {
                value,
                weight,
                priority: priority * rescale,
            });
        }
        Ok(())
    }
}

impl Default for Reservoir {
    fn default() -> Self {
        Reservoir::new()
    }
}

fn unix_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
