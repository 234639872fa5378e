// elspeth-runtime/src/plugins/mod.rs
// ============================================================================
// Module: Plugin Registry & Reference Plugins
// Description: Maps a node's declared plugin name to a boxed trait object,
//              plus the small built-in plugin set needed for §8's
//              end-to-end scenarios.
// Purpose: Keep "which concrete type backs this node" a lookup the loader
//          performs once at graph-build time, never a runtime decision the
//          scheduler itself makes.
// Dependencies: elspeth-core::interfaces
// ============================================================================

//! ## Overview
//! A [`PluginSet`] holds one boxed plugin per node label, already resolved
//! to the correct trait for that node's `NodeType`. The scheduler never
//! inspects a plugin's concrete type; it asks the `PluginSet` for "the
//! source at this label" and gets back a `&mut dyn Source`, matching the
//! `NodeType`-keyed dispatch in `crate::executors`.

pub mod count_aggregation;
pub mod csv_source;
pub mod field_gate;
pub mod http_transform;
pub mod json_sink;
pub mod json_source;
pub mod log_sink;
pub mod merge_coalesce;
pub mod uppercase_transform;

use std::collections::BTreeMap;

use elspeth_core::interfaces::Aggregation;
use elspeth_core::interfaces::Coalesce;
use elspeth_core::interfaces::Gate;
use elspeth_core::interfaces::Sink;
use elspeth_core::interfaces::Source;
use elspeth_core::interfaces::Transform;

use crate::error::PluginRegistryError;

/// Every plugin instance for one run, keyed by the node label it was
/// configured for.
///
/// Construction is entirely the loader's job: `elspeth-runtime` never reads
/// a plugin name string and decides what to instantiate itself.
#[derive(Default)]
pub struct PluginSet {
    sources: BTreeMap<String, Box<dyn Source>>,
    transforms: BTreeMap<String, Box<dyn Transform>>,
    gates: BTreeMap<String, Box<dyn Gate>>,
    aggregations: BTreeMap<String, Box<dyn Aggregation>>,
    coalescers: BTreeMap<String, Box<dyn Coalesce>>,
    sinks: BTreeMap<String, Box<dyn Sink>>,
}

impl PluginSet {
    /// Creates an empty plugin set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a source plugin for `label`.
    pub fn register_source(&mut self, label: impl Into<String>, plugin: Box<dyn Source>) {
        self.sources.insert(label.into(), plugin);
    }

    /// Registers a transform plugin for `label`.
    pub fn register_transform(&mut self, label: impl Into<String>, plugin: Box<dyn Transform>) {
        self.transforms.insert(label.into(), plugin);
    }

    /// Registers a gate plugin for `label`.
    pub fn register_gate(&mut self, label: impl Into<String>, plugin: Box<dyn Gate>) {
        self.gates.insert(label.into(), plugin);
    }

    /// Registers an aggregation plugin for `label`.
    pub fn register_aggregation(&mut self, label: impl Into<String>, plugin: Box<dyn Aggregation>) {
        self.aggregations.insert(label.into(), plugin);
    }

    /// Registers a coalesce plugin for `label`.
    pub fn register_coalesce(&mut self, label: impl Into<String>, plugin: Box<dyn Coalesce>) {
        self.coalescers.insert(label.into(), plugin);
    }

    /// Registers a sink plugin for `label`.
    pub fn register_sink(&mut self, label: impl Into<String>, plugin: Box<dyn Sink>) {
        self.sinks.insert(label.into(), plugin);
    }

    /// Returns the mutable source plugin for `label`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginRegistryError::UnknownPlugin`] if no source is
    /// registered for `label`.
    pub fn source_mut(&mut self, label: &str) -> Result<&mut (dyn Source + 'static), PluginRegistryError> {
        self.sources
            .get_mut(label)
            .map(Box::as_mut)
            .ok_or_else(|| unknown(label, "source"))
    }

    /// Returns the transform plugin for `label`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginRegistryError::UnknownPlugin`] if no transform is
    /// registered for `label`.
    pub fn transform(&self, label: &str) -> Result<&(dyn Transform + 'static), PluginRegistryError> {
        self.transforms.get(label).map(Box::as_ref).ok_or_else(|| unknown(label, "transform"))
    }

    /// Returns the gate plugin for `label`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginRegistryError::UnknownPlugin`] if no gate is
    /// registered for `label`.
    pub fn gate(&self, label: &str) -> Result<&(dyn Gate + 'static), PluginRegistryError> {
        self.gates.get(label).map(Box::as_ref).ok_or_else(|| unknown(label, "gate"))
    }

    /// Returns the mutable aggregation plugin for `label`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginRegistryError::UnknownPlugin`] if no aggregation is
    /// registered for `label`.
    pub fn aggregation_mut(&mut self, label: &str) -> Result<&mut (dyn Aggregation + 'static), PluginRegistryError> {
        self.aggregations.get_mut(label).map(Box::as_mut).ok_or_else(|| unknown(label, "aggregation"))
    }

    /// Returns the coalesce plugin for `label`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginRegistryError::UnknownPlugin`] if no coalescer is
    /// registered for `label`.
    pub fn coalesce(&self, label: &str) -> Result<&(dyn Coalesce + 'static), PluginRegistryError> {
        self.coalescers.get(label).map(Box::as_ref).ok_or_else(|| unknown(label, "coalesce"))
    }

    /// Returns the mutable sink plugin for `label`.
    ///
    /// # Errors
    ///
    /// Returns [`PluginRegistryError::UnknownPlugin`] if no sink is
    /// registered for `label`.
    pub fn sink_mut(&mut self, label: &str) -> Result<&mut (dyn Sink + 'static), PluginRegistryError> {
        self.sinks.get_mut(label).map(Box::as_mut).ok_or_else(|| unknown(label, "sink"))
    }
}

fn unknown(label: &str, plugin_name: &str) -> PluginRegistryError {
    PluginRegistryError::UnknownPlugin { label: label.to_string(), plugin_name: plugin_name.to_string() }
}
