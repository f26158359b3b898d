//! Format codecs.
//!
//! A codec turns a bundle on disk into a [`Machine`] and back. [`JsonCodec`]
//! stores the machine tree as JSON, with every attribute value encoded as a
//! `{"kind": ..., "payload": ...}` pair.

use crate::bundle::{checksum, Bundle, CHECKSUM_FILE, MACHINE_FILE};
use crate::error::CodecError;
use machines_core::machine::Dependency;
use machines_core::Machine;
use std::path::Path;

/// Reads and writes machine bundles.
pub trait FormatCodec: Send + Sync {
    /// Loads the machine stored at `location`.
    fn parse(&self, location: &Path) -> Result<Machine, CodecError>;

    /// Produces the bundle for `machine` at its own location.
    fn generate(&self, machine: &Machine) -> Result<Bundle, CodecError>;

    fn save(&self, machine: &Machine) -> Result<(), CodecError> {
        self.generate(machine)?.write()
    }

    /// Loads a dependency, resolved relative to the depending machine.
    fn resolve_dependency(&self, machine: &Machine, dependency: &Dependency) -> Result<Machine, CodecError> {
        let location = dependency.resolve(&machine.location);
        tracing::debug!(
            "Resolving dependency {} of {} at {}",
            dependency.name(),
            machine.name(),
            location.display()
        );
        self.parse(&location)
    }

    /// Loads every direct dependency, in declaration order.
    fn load_dependencies(&self, machine: &Machine) -> Result<Vec<Machine>, CodecError> {
        machine
            .dependencies
            .iter()
            .map(|dependency| self.resolve_dependency(machine, dependency))
            .collect()
    }
}

/// JSON codec for every dialect.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec {
    pretty: bool,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emits indented JSON.
    pub fn pretty() -> Self {
        Self { pretty: true }
    }

    pub fn encode(&self, machine: &Machine) -> Result<Vec<u8>, CodecError> {
        let data = if self.pretty {
            serde_json::to_vec_pretty(machine)?
        } else {
            serde_json::to_vec(machine)?
        };
        Ok(data)
    }

    /// Decodes a machine and places it at `location`.
    pub fn decode(&self, data: &[u8], location: &Path) -> Result<Machine, CodecError> {
        let mut machine: Machine = serde_json::from_slice(data)?;
        machine.location = location.to_path_buf();
        Ok(machine)
    }
}

impl FormatCodec for JsonCodec {
    fn parse(&self, location: &Path) -> Result<Machine, CodecError> {
        let bundle = Bundle::read(location)?;
        let machine = self.decode(bundle.machine_data()?, location)?;
        tracing::info!(
            "Loaded machine {} ({}, {} states)",
            machine.name(),
            machine.dialect,
            machine.states.len()
        );
        Ok(machine)
    }

    fn generate(&self, machine: &Machine) -> Result<Bundle, CodecError> {
        let data = self.encode(machine)?;
        Ok(Bundle::new(&machine.location)
            .with_file(CHECKSUM_FILE, checksum(&data).into_bytes())
            .with_file(MACHINE_FILE, data))
    }
}
