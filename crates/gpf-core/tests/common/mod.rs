#![allow(dead_code)]

use std::sync::Arc;

use gpf_core::feedback::DestinationError;
use gpf_core::{Geodatabase, LogDestination, Reporter};
use gpf_core_common::mem::MemoryEngine;
use gpf_core_common::{CodedValue, RawDomain, RawField, Value};
use log::Level;
use parking_lot::Mutex;

pub const WORKSPACE: &str = "C:/data/city.gdb";

/// Collects every message it receives.
#[derive(Debug, Clone, Default)]
pub struct Collector(pub Arc<Mutex<Vec<(Level, String)>>>);

impl Collector {
    pub fn contains(&self, needle: &str) -> bool {
        self.0.lock().iter().any(|(_, m)| m.contains(needle))
    }
}

impl LogDestination for Collector {
    fn write(&mut self, level: Level, message: &str) -> Result<(), DestinationError> {
        self.0.lock().push((level, message.to_string()));
        Ok(())
    }
}

fn land_use() -> RawDomain {
    RawDomain {
        name: "LandUse".to_string(),
        values: vec![
            CodedValue {
                code: Value::from("RES"),
                description: "Residential".to_string(),
            },
            CodedValue {
                code: Value::from("COM"),
                description: "Commercial".to_string(),
            },
        ],
    }
}

/// A workspace with a `Parcels` table of ten rows, areas 40, 80, ... 400.
pub fn parcels() -> MemoryEngine {
    let engine = MemoryEngine::new(WORKSPACE);
    engine
        .create_table(
            "Parcels",
            vec![
                RawField::new("OBJECTID", "OID").required().read_only(),
                RawField::new("ID", "Integer").required(),
                RawField::new("AREA", "Double"),
                RawField::new("OWNER", "String").with_length(32),
                RawField::new("LANDUSE", "String").with_length(3).with_domain(land_use()),
            ],
        )
        .expect("create Parcels");
    for i in 1..=10_i64 {
        #[allow(clippy::cast_precision_loss)]
        let area = (i * 40) as f64;
        engine
            .insert(
                "Parcels",
                vec![
                    Value::Null,
                    Value::Integer(100 + i),
                    Value::Double(area),
                    Value::from(format!("Owner {i}")),
                    Value::from(if i % 2 == 0 { "COM" } else { "RES" }),
                ],
            )
            .expect("insert parcel");
    }
    engine
}

/// A connection to `engine` whose feedback lands in the returned collector.
pub fn connect(engine: &MemoryEngine) -> (Geodatabase, Collector) {
    let collector = Collector::default();
    let reporter = Reporter::new(gpf_core::FeedbackConfig {
        buffer_capacity: 1,
        progress_interval: 5,
        min_level: Level::Debug,
    })
    .expect("valid config")
    .with_destination(collector.clone());
    let gdb = Geodatabase::with_reporter(Arc::new(engine.clone()), Arc::new(reporter));
    (gdb, collector)
}
