//! Capture statistics.
//!
//! Two parallel counter tables (`processed` / `discarded`) keyed by
//! resource category. Every write is a no-op unless statistics display was
//! enabled for the run, so the pipeline can call these unconditionally.

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

/// Resource categories tracked by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResourceCategory {
    HtmlBytes,
    HiddenElements,
    HtmlImports,
    Scripts,
    Objects,
    AudioSources,
    VideoSources,
    Frames,
    CssRules,
    Canvas,
    Stylesheets,
    Resources,
    Medias,
}

impl ResourceCategory {
    pub const ALL: [ResourceCategory; 13] = [
        ResourceCategory::HtmlBytes,
        ResourceCategory::HiddenElements,
        ResourceCategory::HtmlImports,
        ResourceCategory::Scripts,
        ResourceCategory::Objects,
        ResourceCategory::AudioSources,
        ResourceCategory::VideoSources,
        ResourceCategory::Frames,
        ResourceCategory::CssRules,
        ResourceCategory::Canvas,
        ResourceCategory::Stylesheets,
        ResourceCategory::Resources,
        ResourceCategory::Medias,
    ];

    /// Human-readable label used in serialized statistics.
    pub fn label(self) -> &'static str {
        match self {
            ResourceCategory::HtmlBytes => "HTML bytes",
            ResourceCategory::HiddenElements => "hidden elements",
            ResourceCategory::HtmlImports => "HTML imports",
            ResourceCategory::Scripts => "scripts",
            ResourceCategory::Objects => "objects",
            ResourceCategory::AudioSources => "audio sources",
            ResourceCategory::VideoSources => "video sources",
            ResourceCategory::Frames => "frames",
            ResourceCategory::CssRules => "CSS rules",
            ResourceCategory::Canvas => "canvas",
            ResourceCategory::Stylesheets => "stylesheets",
            ResourceCategory::Resources => "resources",
            ResourceCategory::Medias => "medias",
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|category| *category == self).unwrap_or(0)
    }
}

/// Which of the two counter tables a write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tally {
    Processed,
    Discarded,
}

/// One counter table, category-indexed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterTable {
    counts: [u64; ResourceCategory::ALL.len()],
}

impl CounterTable {
    pub fn get(&self, category: ResourceCategory) -> u64 {
        self.counts[category.index()]
    }

    fn set(&mut self, category: ResourceCategory, value: u64) {
        self.counts[category.index()] = value;
    }

    fn add(&mut self, category: ResourceCategory, delta: u64) {
        self.counts[category.index()] += delta;
    }
}

impl Serialize for CounterTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(ResourceCategory::ALL.len()))?;
        for category in ResourceCategory::ALL {
            map.serialize_entry(category.label(), &self.get(category))?;
        }
        map.end()
    }
}

/// The complete counter set of one document capture.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsData {
    pub processed: CounterTable,
    pub discarded: CounterTable,
}

/// Mutable statistics accumulator, scoped to one document runner.
#[derive(Debug)]
pub struct Stats {
    data: Option<StatsData>,
}

impl Stats {
    pub fn new(enabled: bool) -> Self {
        Self {
            data: enabled.then(StatsData::default),
        }
    }

    pub fn set(&mut self, tally: Tally, category: ResourceCategory, value: u64) {
        if let Some(data) = self.data.as_mut() {
            table(data, tally).set(category, value);
        }
    }

    pub fn add(&mut self, tally: Tally, category: ResourceCategory, delta: u64) {
        if let Some(data) = self.data.as_mut() {
            table(data, tally).add(category, delta);
        }
    }

    /// Fold a completed child document's counters in, category by category.
    pub fn merge_from(&mut self, child: Option<&StatsData>) {
        if let (Some(data), Some(child)) = (self.data.as_mut(), child) {
            for category in ResourceCategory::ALL {
                data.processed.add(category, child.processed.get(category));
                data.discarded.add(category, child.discarded.get(category));
            }
        }
    }

    pub fn snapshot(&self) -> Option<StatsData> {
        self.data.clone()
    }
}

fn table(data: &mut StatsData, tally: Tally) -> &mut CounterTable {
    match tally {
        Tally::Processed => &mut data.processed,
        Tally::Discarded => &mut data.discarded,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_stats_ignore_writes() {
        let mut stats = Stats::new(false);
        stats.add(Tally::Processed, ResourceCategory::Frames, 3);
        assert!(stats.snapshot().is_none());
    }

    #[test]
    fn merge_is_additive_per_category() {
        let mut parent = Stats::new(true);
        parent.set(Tally::Processed, ResourceCategory::Scripts, 2);

        let mut child = Stats::new(true);
        child.add(Tally::Processed, ResourceCategory::Scripts, 1);
        child.add(Tally::Discarded, ResourceCategory::Frames, 1);

        parent.merge_from(child.snapshot().as_ref());
        let data = parent.snapshot().unwrap();
        assert_eq!(data.processed.get(ResourceCategory::Scripts), 3);
        assert_eq!(data.discarded.get(ResourceCategory::Frames), 1);
    }

    #[test]
    fn labels_serialize_as_map_keys() {
        let mut stats = Stats::new(true);
        stats.set(Tally::Discarded, ResourceCategory::HtmlBytes, 10);
        let json = serde_json::to_value(stats.snapshot().unwrap()).unwrap();
        assert_eq!(json["discarded"]["HTML bytes"], 10);
    }
}
