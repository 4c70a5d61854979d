use opentelemetry::metrics::{Counter, Meter};
use opentelemetry::KeyValue;

/// OTel counters for reprocessing outcomes, labelled by queue entity.
pub struct Metrics {
    pub messages_completed: Counter<u64>,
    pub messages_abandoned: Counter<u64>,
    pub messages_dead_lettered: Counter<u64>,
    pub messages_rescheduled: Counter<u64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create metrics from the global meter provider. If no meter provider
    /// is configured, the instruments are no-op.
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("reprise");
        Self::from_meter(&meter)
    }

    /// Create metrics from a specific meter (used in tests with in-memory exporter).
    pub fn from_meter(meter: &Meter) -> Self {
        Self {
            messages_completed: meter
                .u64_counter("reprise.messages.completed")
                .with_description("Deliveries completed after the handler succeeded")
                .build(),
            messages_abandoned: meter
                .u64_counter("reprise.messages.abandoned")
                .with_description("Deliveries abandoned after a permanent handler failure")
                .build(),
            messages_dead_lettered: meter
                .u64_counter("reprise.messages.dead_lettered")
                .with_description("Messages dead-lettered after exhausting retry attempts")
                .build(),
            messages_rescheduled: meter
                .u64_counter("reprise.messages.rescheduled")
                .with_description("Messages rescheduled for delayed redelivery")
                .build(),
        }
    }

    pub fn record_complete(&self, entity: &str) {
        self.messages_completed
            .add(1, &[KeyValue::new("entity", entity.to_string())]);
    }

    pub fn record_abandon(&self, entity: &str) {
        self.messages_abandoned
            .add(1, &[KeyValue::new("entity", entity.to_string())]);
    }

    pub fn record_dead_letter(&self, entity: &str) {
        self.messages_dead_lettered
            .add(1, &[KeyValue::new("entity", entity.to_string())]);
    }

    pub fn record_reschedule(&self, entity: &str, attempt: u32) {
        self.messages_rescheduled.add(
            1,
            &[
                KeyValue::new("entity", entity.to_string()),
                KeyValue::new("attempt", i64::from(attempt)),
            ],
        );
    }
}

/// Test harness for asserting OTel metrics using an in-memory exporter.
#[cfg(test)]
pub mod test_harness {
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry::KeyValue;
    use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData, ResourceMetrics};
    use opentelemetry_sdk::metrics::in_memory_exporter::InMemoryMetricExporter;
    use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};

    use super::Metrics;

    /// Wires an in-memory exporter to a meter provider and builds `Metrics`
    /// bound to it.
    pub struct MetricTestHarness {
        pub metrics: Metrics,
        pub exporter: InMemoryMetricExporter,
        pub meter_provider: SdkMeterProvider,
    }

    impl MetricTestHarness {
        pub fn new() -> Self {
            let exporter = InMemoryMetricExporter::default();
            let reader = PeriodicReader::builder(exporter.clone()).build();
            let meter_provider = SdkMeterProvider::builder().with_reader(reader).build();
            let meter = meter_provider.meter("reprise-test");
            let metrics = Metrics::from_meter(&meter);
            Self {
                metrics,
                exporter,
                meter_provider,
            }
        }

        /// Flush, then read the summed counter for `entity`. Counters split
        /// by extra attributes are added together.
        pub fn counter(&self, metric_name: &str, entity: &str) -> Option<u64> {
            self.meter_provider.force_flush().expect("flush failed");
            let metrics = self
                .exporter
                .get_finished_metrics()
                .expect("failed to get finished metrics");
            counter_value_u64(&metrics, metric_name, entity)
        }

        pub fn assert_counter(&self, metric_name: &str, entity: &str, expected: u64) {
            let value = self.counter(metric_name, entity);
            assert_eq!(
                value,
                Some(expected),
                "expected counter {metric_name}[entity={entity}] = {expected}, got {value:?}"
            );
        }
    }

    fn counter_value_u64(
        resource_metrics: &[ResourceMetrics],
        name: &str,
        entity: &str,
    ) -> Option<u64> {
        let expected_attr = KeyValue::new("entity", entity.to_string());
        // Exporter keeps every flush; cumulative temporality means the last
        // export holds the running totals.
        let rm = resource_metrics.last()?;
        let mut total = None;
        for sm in rm.scope_metrics() {
            for metric in sm.metrics() {
                if metric.name() != name {
                    continue;
                }
                if let AggregatedMetrics::U64(MetricData::Sum(sum)) = metric.data() {
                    for dp in sum.data_points() {
                        if dp.attributes().any(|a| *a == expected_attr) {
                            *total.get_or_insert(0) += dp.value();
                        }
                    }
                }
            }
        }
        total
    }

    #[test]
    fn counters_are_labelled_by_entity() {
        let harness = MetricTestHarness::new();
        harness.metrics.record_complete("orders");
        harness.metrics.record_complete("orders");
        harness.metrics.record_abandon("payments");
        harness.metrics.record_reschedule("orders", 1);
        harness.metrics.record_reschedule("orders", 2);

        harness.assert_counter("reprise.messages.completed", "orders", 2);
        harness.assert_counter("reprise.messages.abandoned", "payments", 1);
        harness.assert_counter("reprise.messages.rescheduled", "orders", 2);
        assert_eq!(harness.counter("reprise.messages.dead_lettered", "orders"), None);
    }
}
