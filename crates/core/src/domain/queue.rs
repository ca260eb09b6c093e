// Collection configuration — a named, independent job queue sharing one
// physical store (GLOSSARY: Collection). Each collection owns its own
// promotion timer and stopped flag (§9: "singletons owned by the collection
// object, multiple collections coexist independently").

pub type CollectionId = String;

#[derive(Debug, Clone)]
pub struct CollectionConfig {
    pub name: CollectionId,
    pub promotion_interval_ms: u64,
}

impl CollectionConfig {
    pub fn new(name: impl Into<String>, promotion_interval_ms: u64) -> Self {
        Self {
            name: name.into(),
            promotion_interval_ms,
        }
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self::new("default", 15_000)
    }
}
