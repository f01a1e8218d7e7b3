//! Histogram/timer: decaying reservoir plus per-interval local stats.

use super::{Aggregates, CombineError, FlushContext, Reservoir};
use crate::metrics::OutputMetric;

/// Samples feed both a forward-decaying reservoir (for quantiles) and a set
/// of per-flush-interval stats. The reservoir survives flushes and keeps
/// decaying; the local stats reset every flush, and a histogram that saw no
/// samples during the interval emits nothing.
#[derive(Debug, Clone)]
pub struct Histogram {
    name: String,
    tags: Vec<String>,
    reservoir: Reservoir,
    /// Sum of 1/sample_rate over the interval's samples.
    local_weight: f64,
    local_min: f64,
    local_max: f64,
    /// Weighted sum of sampled values over the interval.
    local_sum: f64,
}

impl Histogram {
    pub fn new(name: String, tags: Vec<String>) -> Self {
        Self::with_reservoir(name, tags, Reservoir::new())
    }

    #[cfg(test)]
    pub fn with_seed(name: String, tags: Vec<String>, seed: u64) -> Self {
        Self::with_reservoir(name, tags, Reservoir::with_seed(seed))
    }

    fn with_reservoir(name: String, tags: Vec<String>, reservoir: Reservoir) -> Self {
        Histogram {
            name,
            tags,
            reservoir,
            local_weight: 0.0,
            local_min: f64::INFINITY,
            local_max: f64::NEG_INFINITY,
            local_sum: 0.0,
        }
    }

    pub fn sample(&mut self, value: f64, sample_rate: f64) {
        let weight = 1.0 / sample_rate;
        self.reservoir.insert(value, weight);
        self.local_weight += weight;
        self.local_sum += value * weight;
        if value < self.local_min {
            self.local_min = value;
        }
        if value > self.local_max {
            self.local_max = value;
        }
    }

    /// Emits the configured aggregates in a fixed order (max, min, sum, avg,
    /// count, median) followed by each percentile in configured order.
    /// `count` is rate-typed; everything else is a gauge.
    pub fn flush(&mut self, ctx: &FlushContext<'_>) -> Vec<OutputMetric> {
        if self.local_weight == 0.0 {
            return Vec::new();
        }

        let mut out = Vec::new();
        let gauge = |suffix: &str, value: f64| {
            OutputMetric::gauge(
                format!("{}.{}", self.name, suffix),
                self.tags.clone(),
                ctx.timestamp,
                value,
            )
        };

        if ctx.aggregates.contains(Aggregates::MAX) {
            out.push(gauge("max", self.local_max));
        }
        if ctx.aggregates.contains(Aggregates::MIN) {
            out.push(gauge("min", self.local_min));
        }
        if ctx.aggregates.contains(Aggregates::SUM) {
            out.push(gauge("sum", self.local_sum));
        }
        if ctx.aggregates.contains(Aggregates::AVG) {
            out.push(gauge("avg", self.local_sum / self.local_weight));
        }
        if ctx.aggregates.contains(Aggregates::COUNT) {
            out.push(OutputMetric::rate(
                format!("{}.count", self.name),
                self.tags.clone(),
                ctx.timestamp,
                self.local_weight / ctx.interval_secs as f64,
                ctx.interval_secs,
            ));
        }
        if ctx.aggregates.contains(Aggregates::MEDIAN) {
            out.push(gauge("median", self.reservoir.quantile(0.5)));
        }
        for &p in ctx.percentiles {
            let suffix = format!("{}percentile", (p * 100.0) as i32);
            out.push(gauge(&suffix, self.reservoir.quantile(p)));
        }

        self.local_weight = 0.0;
        self.local_min = f64::INFINITY;
        self.local_max = f64::NEG_INFINITY;
        self.local_sum = 0.0;
        out
    }

    /// Reservoir snapshot; local interval stats are never exported.
    pub fn export(&self) -> Vec<u8> {
        self.reservoir.export()
    }

    /// Merges an exported reservoir. Local interval stats are untouched, so
    /// a combine alone never makes this histogram flush-eligible.
    pub fn combine(&mut self, snapshot: &[u8]) -> Result<(), CombineError> {
        self.reservoir.combine(snapshot)
    }

    #[cfg(test)]
    fn local_stats(&self) -> (f64, f64, f64, f64) {
        (self.local_weight, self.local_min, self.local_max, self.local_sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::OutputKind;

    fn ctx<'a>(percentiles: &'a [f64], aggregates: Aggregates) -> FlushContext<'a> {
        FlushContext {
            interval_secs: 10,
            timestamp: 1476119058,
            percentiles,
            aggregates,
        }
    }

    fn names(out: &[OutputMetric]) -> Vec<&str> {
        out.iter().map(|m| m.name.as_str()).collect()
    }

    #[test]
    fn full_menu_in_documented_order() {
        let mut h = Histogram::with_seed("a.b.c".to_string(), vec![], 42);
        for v in [5.0, 10.0, 15.0, 20.0, 25.0] {
            h.sample(v, 1.0);
        }
        let out = h.flush(&ctx(&[0.90], Aggregates::all()));

        assert_eq!(
            names(&out),
            vec![
                "a.b.c.max",
                "a.b.c.min",
                "a.b.c.sum",
                "a.b.c.avg",
                "a.b.c.count",
                "a.b.c.median",
                "a.b.c.90percentile",
            ]
        );
        assert_eq!(out[0].value(), 25.0);
        assert_eq!(out[1].value(), 5.0);
        assert_eq!(out[2].value(), 75.0);
        assert_eq!(out[3].value(), 15.0);
        assert_eq!(out[4].value(), 0.5);
        assert_eq!(out[4].kind, OutputKind::Rate);
        assert_eq!(out[4].interval, 10);
        assert_eq!(out[5].value(), 15.0);
        assert_eq!(out[6].value(), 23.75);
        assert_eq!(out[6].kind, OutputKind::Gauge);
        assert_eq!(out[6].interval, 0);
    }

    #[test]
    fn sample_rate_scales_count_and_weights() {
        let mut h = Histogram::with_seed("a.b.c".to_string(), vec![], 42);
        for v in [5.0, 10.0, 15.0, 20.0, 25.0] {
            h.sample(v, 0.5);
        }
        let aggs = Aggregates::MAX.with(Aggregates::MIN).with(Aggregates::COUNT);
        let out = h.flush(&ctx(&[0.50], aggs));

        assert_eq!(
            names(&out),
            vec!["a.b.c.max", "a.b.c.min", "a.b.c.count", "a.b.c.50percentile"]
        );
        assert_eq!(out[0].value(), 25.0);
        assert_eq!(out[1].value(), 5.0);
        // Ten effective samples over a ten second interval.
        assert_eq!(out[2].value(), 1.0);
        assert_eq!(out[3].value(), 15.0);
    }

    #[test]
    fn idle_interval_emits_nothing() {
        let mut h = Histogram::with_seed("a.b.c".to_string(), vec![], 1);
        h.sample(1.0, 1.0);
        assert!(!h.flush(&ctx(&[], Aggregates::all())).is_empty());
        // Reservoir still holds the sample, but nothing new arrived.
        assert!(h.flush(&ctx(&[], Aggregates::all())).is_empty());
    }

    #[test]
    fn combine_does_not_populate_local_stats() {
        let mut donor = Histogram::with_seed("a.b.c".to_string(), vec![], 2);
        donor.sample(7.0, 1.0);
        let mut h = Histogram::with_seed("a.b.c".to_string(), vec![], 3);
        h.combine(&donor.export()).unwrap();

        let (weight, min, max, sum) = h.local_stats();
        assert_eq!(weight, 0.0);
        assert_eq!(min, f64::INFINITY);
        assert_eq!(max, f64::NEG_INFINITY);
        assert_eq!(sum, 0.0);
        assert!(h.flush(&ctx(&[], Aggregates::all())).is_empty());

        h.sample(9.0, 1.0);
        let (weight, min, max, _) = h.local_stats();
        assert_eq!(weight, 1.0);
        assert_eq!(min, 9.0);
        assert_eq!(max, 9.0);
        // The merged reservoir still informs quantiles.
        assert_eq!(h.reservoir.len(), 2);
    }

    #[test]
    fn tags_propagate_to_every_output() {
        let mut h = Histogram::with_seed("a.b.c".to_string(), vec!["env:prod".to_string()], 4);
        h.sample(1.0, 1.0);
        for m in h.flush(&ctx(&[0.99], Aggregates::all())) {
            assert_eq!(m.tags, vec!["env:prod".to_string()]);
        }
    }
}
