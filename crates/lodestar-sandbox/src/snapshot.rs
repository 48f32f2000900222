use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use wasmtime::{Mutability, Val};

use crate::sandbox::{SandboxError, SandboxInstance};

/// Exported name of the linear memory captured in snapshots.
pub const MEMORY_EXPORT: &str = "memory";

/// Immutable copy of an instance's observable state: the exported memory
/// and every exported mutable global. Cheap to clone.
///
/// Non-exported globals are not captured. Modules whose state lives in
/// them do not replay deterministically.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WasmSnapshot {
    memory: Option<Arc<Vec<u8>>>,
    globals: Arc<Vec<GlobalSnapshot>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GlobalSnapshot {
    pub name: String,
    pub value: SerializedVal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SerializedVal {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
}

impl SerializedVal {
    fn from_val(val: &Val) -> Option<Self> {
        match val {
            Val::I32(v) => Some(SerializedVal::I32(*v)),
            Val::I64(v) => Some(SerializedVal::I64(*v)),
            Val::F32(v) => Some(SerializedVal::F32(*v)),
            Val::F64(v) => Some(SerializedVal::F64(*v)),
            _ => None,
        }
    }

    fn to_val(self) -> Val {
        match self {
            SerializedVal::I32(v) => Val::I32(v),
            SerializedVal::I64(v) => Val::I64(v),
            SerializedVal::F32(v) => Val::F32(v),
            SerializedVal::F64(v) => Val::F64(v),
        }
    }

    pub fn to_json(self) -> serde_json::Value {
        match self {
            SerializedVal::I32(v) => v.into(),
            SerializedVal::I64(v) => v.into(),
            SerializedVal::F32(v) => f32::from_bits(v).into(),
            SerializedVal::F64(v) => f64::from_bits(v).into(),
        }
    }
}

impl WasmSnapshot {
    pub fn memory_len(&self) -> usize {
        self.memory.as_ref().map(|m| m.len()).unwrap_or(0)
    }

    pub fn memory(&self) -> Option<&[u8]> {
        self.memory.as_deref().map(|m| m.as_slice())
    }

    pub fn globals(&self) -> &[GlobalSnapshot] {
        &self.globals
    }

    pub fn global(&self, name: &str) -> Option<SerializedVal> {
        self.globals.iter().find(|g| g.name == name).map(|g| g.value)
    }

    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

impl SandboxInstance {
    pub fn snapshot(&mut self) -> Result<WasmSnapshot, SandboxError> {
        Ok(WasmSnapshot {
            memory: self.capture_memory().map(Arc::new),
            globals: Arc::new(self.capture_globals()),
        })
    }

    /// Restore `snapshot` into this instance.
    ///
    /// Returns `false` without touching the instance when its memory has
    /// grown past the snapshot's: linear memory cannot shrink, so such an
    /// instance cannot reproduce the snapshot exactly.
    pub fn restore(&mut self, snapshot: &WasmSnapshot) -> Result<bool, SandboxError> {
        if let Some(ref memory_data) = snapshot.memory {
            if !self.restore_memory(memory_data)? {
                return Ok(false);
            }
        }
        self.restore_globals(&snapshot.globals)?;
        Ok(true)
    }

    fn capture_memory(&mut self) -> Option<Vec<u8>> {
        let memory = self.instance.get_memory(&mut self.store, MEMORY_EXPORT)?;
        Some(memory.data(&self.store).to_vec())
    }

    fn capture_globals(&mut self) -> Vec<GlobalSnapshot> {
        let export_names: Vec<String> = self
            .instance
            .exports(&mut self.store)
            .map(|e| e.name().to_string())
            .collect();

        let mut globals = Vec::new();
        for name in export_names {
            let Some(global) = self.instance.get_global(&mut self.store, &name) else {
                continue;
            };
            if global.ty(&self.store).mutability() != Mutability::Var {
                continue;
            }
            if let Some(value) = SerializedVal::from_val(&global.get(&mut self.store)) {
                globals.push(GlobalSnapshot { name, value });
            }
        }
        globals
    }

    fn restore_memory(&mut self, data: &[u8]) -> Result<bool, SandboxError> {
        let Some(memory) = self.instance.get_memory(&mut self.store, MEMORY_EXPORT) else {
            return Ok(true);
        };
        let current_size = memory.data_size(&self.store);
        let target_size = data.len();

        if current_size > target_size {
            return Ok(false);
        }
        if target_size > current_size {
            let pages_needed = (target_size - current_size).div_ceil(65536);
            memory.grow(&mut self.store, pages_needed as u64)?;
        }

        let mem_data = memory.data_mut(&mut self.store);
        let copy_len = data.len().min(mem_data.len());
        mem_data[..copy_len].copy_from_slice(&data[..copy_len]);
        for byte in &mut mem_data[copy_len..] {
            *byte = 0;
        }
        Ok(true)
    }

    fn restore_globals(&mut self, globals: &[GlobalSnapshot]) -> Result<(), SandboxError> {
        for g in globals {
            if let Some(global) = self.instance.get_global(&mut self.store, &g.name) {
                global.set(&mut self.store, g.value.to_val())?;
            }
        }
        Ok(())
    }
}
