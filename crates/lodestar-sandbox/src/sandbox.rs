use wasmtime::{Engine, ExternType, Linker, Module, Store, Trap, Val, ValType};

use crate::config::SandboxConfig;

#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("WASM engine error: {0}")]
    Engine(#[from] wasmtime::Error),

    #[error("WAT parse error: {0}")]
    Wat(#[from] wat::Error),

    #[error("Export not found: {name}")]
    ExportNotFound { name: String },

    #[error("Fuel exhausted during execution")]
    FuelExhausted,

    #[error("Trap: {message}")]
    Trap { message: String },

    #[error("Type mismatch: {details}")]
    TypeMismatch { details: String },
}

/// Store data that implements resource limiting.
pub(crate) struct StoreData {
    memory_limit_bytes: u64,
}

impl wasmtime::ResourceLimiter for StoreData {
    fn memory_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok((desired as u64) <= self.memory_limit_bytes)
    }

    fn table_growing(
        &mut self,
        _current: usize,
        desired: usize,
        _maximum: Option<usize>,
    ) -> wasmtime::Result<bool> {
        Ok(desired <= 10_000)
    }
}

/// Engine plus configuration shared by every module it loads.
pub struct Sandbox {
    engine: Engine,
    config: SandboxConfig,
}

/// A compiled module, not yet instantiated.
#[derive(Clone)]
pub struct LoadedModule {
    module: Module,
    bytes: Vec<u8>,
}

/// Signature of one exported function.
#[derive(Debug, Clone)]
pub struct ExportedFunc {
    pub name: String,
    pub params: Vec<ValType>,
    pub results: usize,
}

/// A live instance ready for calls.
pub struct SandboxInstance {
    pub(crate) store: Store<StoreData>,
    pub(crate) instance: wasmtime::Instance,
    pub(crate) fuel_per_call: Option<u64>,
}

impl Sandbox {
    pub fn new(config: &SandboxConfig) -> Result<Self, SandboxError> {
        let mut engine_config = wasmtime::Config::new();

        if config.fuel_per_call.is_some() {
            engine_config.consume_fuel(true);
        }

        // Pure computation only.
        engine_config.wasm_threads(false);

        let engine = Engine::new(&engine_config)?;
        Ok(Self {
            engine,
            config: config.clone(),
        })
    }

    /// Load a module from binary WASM or WAT text. Validates the module.
    pub fn load_module(&self, source: &[u8]) -> Result<LoadedModule, SandboxError> {
        let bytes = wat::parse_bytes(source)?.into_owned();
        let module = Module::new(&self.engine, &bytes)?;
        Ok(LoadedModule { module, bytes })
    }

    /// Instantiate with no imports.
    pub fn instantiate(&self, loaded: &LoadedModule) -> Result<SandboxInstance, SandboxError> {
        let data = StoreData {
            memory_limit_bytes: self.config.memory_limit_bytes,
        };
        let mut store = Store::new(&self.engine, data);
        store.limiter(|data| data);

        let fuel_per_call = self.config.fuel_per_call;
        if let Some(fuel) = fuel_per_call {
            store.set_fuel(fuel)?;
        }

        let linker = Linker::new(&self.engine);
        let instance = linker.instantiate(&mut store, &loaded.module)?;

        Ok(SandboxInstance {
            store,
            instance,
            fuel_per_call,
        })
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }
}

impl LoadedModule {
    /// Binary form of the module.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Every exported function with its signature, in export order.
    pub fn exported_funcs(&self) -> Vec<ExportedFunc> {
        self.module
            .exports()
            .filter_map(|export| match export.ty() {
                ExternType::Func(ty) => Some(ExportedFunc {
                    name: export.name().to_string(),
                    params: ty.params().collect(),
                    results: ty.results().len(),
                }),
                _ => None,
            })
            .collect()
    }
}

impl SandboxInstance {
    /// Call an exported function. Fuel is reset to the per-call budget first.
    pub fn call_func(&mut self, name: &str, args: &[Val]) -> Result<Vec<Val>, SandboxError> {
        if let Some(fuel) = self.fuel_per_call {
            self.store.set_fuel(fuel)?;
        }

        let func = self
            .instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| SandboxError::ExportNotFound {
                name: name.to_string(),
            })?;

        let result_count = func.ty(&self.store).results().len();
        let mut results = vec![Val::I32(0); result_count];

        match func.call(&mut self.store, args, &mut results) {
            Ok(()) => Ok(results),
            Err(err) => match err.downcast_ref::<Trap>().copied() {
                Some(Trap::OutOfFuel) => Err(SandboxError::FuelExhausted),
                Some(trap) => Err(SandboxError::Trap {
                    message: trap.to_string(),
                }),
                None => Err(SandboxError::Engine(err)),
            },
        }
    }

    /// Call a nullary export returning a single `i32`.
    pub fn call_i32(&mut self, name: &str) -> Result<i32, SandboxError> {
        let results = self.call_func(name, &[])?;
        match results.first() {
            Some(Val::I32(v)) => Ok(*v),
            other => Err(SandboxError::TypeMismatch {
                details: format!("'{name}' returned {other:?}, expected a single i32"),
            }),
        }
    }

    pub fn remaining_fuel(&self) -> Option<u64> {
        self.store.get_fuel().ok()
    }
}
