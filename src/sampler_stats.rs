use std::{collections::HashMap, fmt};

#[derive(Debug, Clone, PartialEq)]
pub enum SampleStatValue {
    U64(u64),
    F64(f64),
    Bool(bool),
}

impl From<u64> for SampleStatValue {
    fn from(val: u64) -> Self {
        SampleStatValue::U64(val)
    }
}

impl From<f64> for SampleStatValue {
    fn from(val: f64) -> Self {
        SampleStatValue::F64(val)
    }
}

impl From<bool> for SampleStatValue {
    fn from(val: bool) -> Self {
        SampleStatValue::Bool(val)
    }
}

pub trait AsSampleStatMap {
    fn as_map(&self) -> HashMap<&'static str, SampleStatValue>;
}

/// Diagnostics of a single draw.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawStats {
    pub chain: u64,
    /// 1-based index of the draw in its chain.
    pub draw: u64,
    pub depth: u64,
    pub maxdepth_reached: bool,
    pub diverging: bool,
    /// The step size the trajectory was integrated with.
    pub step_size: f64,
    pub mean_tree_accept: f64,
    pub tree_size: u64,
    pub logp: f64,
    pub energy: f64,
    pub tuning: bool,
}

impl AsSampleStatMap for DrawStats {
    fn as_map(&self) -> HashMap<&'static str, SampleStatValue> {
        let mut map: HashMap<_, SampleStatValue> = HashMap::with_capacity(11);
        map.insert("chain", self.chain.into());
        map.insert("draw", self.draw.into());
        map.insert("depth", self.depth.into());
        map.insert("maxdepth_reached", self.maxdepth_reached.into());
        map.insert("diverging", self.diverging.into());
        map.insert("step_size", self.step_size.into());
        map.insert("mean_tree_accept", self.mean_tree_accept.into());
        map.insert("tree_size", self.tree_size.into());
        map.insert("logp", self.logp.into());
        map.insert("energy", self.energy.into());
        map.insert("tuning", self.tuning.into());
        map
    }
}

/// Quantities that can be recorded for every draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    StepSize,
    LogProb,
    MeanTreeAccept,
    TreeSize,
}

impl Metric {
    pub const ALL: [Metric; 4] = [
        Metric::StepSize,
        Metric::LogProb,
        Metric::MeanTreeAccept,
        Metric::TreeSize,
    ];
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Metric::StepSize => "step_size",
            Metric::LogProb => "logp",
            Metric::MeanTreeAccept => "mean_tree_accept",
            Metric::TreeSize => "tree_size",
        };
        f.write_str(name)
    }
}

/// One trace per metric, in draw order.
#[derive(Debug, Clone, Default)]
pub struct Statistics {
    traces: HashMap<Metric, Vec<f64>>,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&mut self, metric: Metric, value: f64) {
        self.traces.entry(metric).or_default().push(value);
    }

    pub fn record(&mut self, stats: &DrawStats) {
        self.store(Metric::StepSize, stats.step_size);
        self.store(Metric::LogProb, stats.logp);
        self.store(Metric::MeanTreeAccept, stats.mean_tree_accept);
        self.store(Metric::TreeSize, stats.tree_size as f64);
    }

    pub fn get(&self, metric: Metric) -> &[f64] {
        self.traces.get(&metric).map(|trace| &trace[..]).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.get(Metric::LogProb).len()
    }

    pub fn is_empty(&self) -> bool {
        self.traces.values().all(|trace| trace.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn stats(draw: u64) -> DrawStats {
        DrawStats {
            chain: 0,
            draw,
            depth: 3,
            maxdepth_reached: false,
            diverging: false,
            step_size: 0.5,
            mean_tree_accept: 0.8,
            tree_size: 8,
            logp: -1.5,
            energy: 2.,
            tuning: true,
        }
    }

    #[test]
    fn records_every_metric() {
        let mut statistics = Statistics::new();
        assert!(statistics.is_empty());
        statistics.record(&stats(1));
        statistics.record(&stats(2));
        assert_eq!(statistics.len(), 2);
        assert_eq!(statistics.get(Metric::TreeSize), &[8., 8.]);
        assert_eq!(statistics.get(Metric::StepSize), &[0.5, 0.5]);
        for metric in Metric::ALL {
            assert_eq!(statistics.get(metric).len(), 2, "{metric}");
        }
    }

    #[test]
    fn stat_map() {
        let map = stats(4).as_map();
        assert_eq!(map.len(), 11);
        assert_eq!(map["draw"], SampleStatValue::U64(4));
        assert_eq!(map["diverging"], SampleStatValue::Bool(false));
        assert_eq!(map["logp"], SampleStatValue::F64(-1.5));
    }
}
