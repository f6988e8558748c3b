use parking_lot::Mutex;
use prometheus::{Gauge, Opts, Registry};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::uncore::{ConfigSpace, CounterSample, LocalRegisters, Uncore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterMetric {
    Counter,
    FixedCounter,
}

impl CounterMetric {
    pub fn name(&self) -> &'static str {
        match self {
            CounterMetric::Counter => "uncore_counter",
            CounterMetric::FixedCounter => "uncore_fixed_counter",
        }
    }

    fn of(sample: &CounterSample) -> Self {
        match sample.counter {
            Some(_) => CounterMetric::Counter,
            None => CounterMetric::FixedCounter,
        }
    }

    fn help(&self) -> &'static str {
        match self {
            CounterMetric::Counter => "Raw uncore programmable counter value",
            CounterMetric::FixedCounter => "Raw uncore fixed-function counter value",
        }
    }
}

/// Anything that can produce a full set of counter readings
pub trait CounterSource: Send + Sync {
    fn sample(&self) -> Result<Vec<CounterSample>>;
}

impl<L: LocalRegisters, D: ConfigSpace> CounterSource for Uncore<L, D> {
    fn sample(&self) -> Result<Vec<CounterSample>> {
        self.sample_counters()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct GaugeKey {
    box_type: &'static str,
    ordinal: u32,
    counter: Option<u32>,
}

impl From<&CounterSample> for GaugeKey {
    fn from(sample: &CounterSample) -> Self {
        Self {
            box_type: sample.box_type,
            ordinal: sample.ordinal,
            counter: sample.counter,
        }
    }
}

pub struct CounterExporter {
    source: Arc<dyn CounterSource>,
    registry: Arc<Registry>,
    // Created on first sight; the box set is fixed after enumeration
    gauges: Mutex<HashMap<GaugeKey, Gauge>>,
    instance_label: String,
}

impl CounterExporter {
    pub fn new(source: Arc<dyn CounterSource>) -> Self {
        let instance_label = std::env::var("INSTANCE_LABEL").unwrap_or_else(|_| "none".to_string());

        Self {
            source,
            registry: Arc::new(Registry::new()),
            gauges: Mutex::new(HashMap::new()),
            instance_label,
        }
    }

    fn gauge(&self, sample: &CounterSample) -> Result<Gauge> {
        let key = GaugeKey::from(sample);
        let mut gauges = self.gauges.lock();
        if let Some(gauge) = gauges.get(&key) {
            return Ok(gauge.clone());
        }

        let metric = CounterMetric::of(sample);
        let mut labels = HashMap::from([
            ("box_type".to_string(), sample.box_type.to_string()),
            ("box".to_string(), sample.ordinal.to_string()),
            ("instance".to_string(), self.instance_label.clone()),
        ]);
        if let Some(counter) = sample.counter {
            labels.insert("counter".to_string(), counter.to_string());
        }

        let opts = Opts::new(metric.name(), metric.help()).const_labels(labels);
        let gauge = Gauge::with_opts(opts)?;
        self.registry.register(Box::new(gauge.clone()))?;
        gauges.insert(key, gauge.clone());
        Ok(gauge)
    }

    /// Read every counter once and publish it; returns the number of gauges set
    pub fn collect_once(&self) -> Result<usize> {
        let samples = self.source.sample()?;
        for sample in &samples {
            self.gauge(sample)?.set(sample.value as f64);
        }
        Ok(samples.len())
    }

    pub async fn collect(&self) {
        match self.collect_once() {
            Ok(count) => tracing::trace!("Updated {} uncore counter gauges", count),
            Err(e) => tracing::error!("Failed to collect uncore counters: {}", e),
        }
    }

    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry)
    }
}
