use std::collections::{BTreeSet, HashMap};

use crossbeam::queue::ArrayQueue;
use lodestar_ir::sequence::Invocation;
use lodestar_ir::types::{ArgValue, CallValue, Domain, InvariantSpec, OperationSpec, Param};
use lodestar_model::adapter::{AdapterFault, CallStatus, SutAdapter, Transition};
use tracing::{debug, warn};
use wasmtime::{Val, ValType};

use crate::config::SandboxConfig;
use crate::harvest::harvest_constants;
use crate::sandbox::{LoadedModule, Sandbox, SandboxError, SandboxInstance};
use crate::snapshot::WasmSnapshot;

/// Exports named `invariant_<name>` are predicates, not operations.
pub const INVARIANT_PREFIX: &str = "invariant_";

/// A WASM module bound as a system under test.
///
/// Every other exported function with `i32`/`i64` parameters is an
/// operation. A trap inside an operation is the module refusing the call,
/// and the state reverts. Running out of fuel is a timeout fault.
///
/// Instances are pooled and restored from the caller's snapshot before
/// every call, so any worker may use any instance.
pub struct WasmSut {
    sandbox: Sandbox,
    module: LoadedModule,
    operations: Vec<OperationSpec>,
    param_types: HashMap<String, Vec<ValType>>,
    invariants: BTreeSet<String>,
    dictionary: Vec<i64>,
    initial: WasmSnapshot,
    pool: ArrayQueue<SandboxInstance>,
}

impl WasmSut {
    /// Load a module from binary WASM or WAT text.
    pub fn load(source: &[u8], config: &SandboxConfig) -> Result<Self, SandboxError> {
        let sandbox = Sandbox::new(config)?;
        let module = sandbox.load_module(source)?;

        let mut operations = Vec::new();
        let mut param_types = HashMap::new();
        let mut invariants = BTreeSet::new();

        for func in module.exported_funcs() {
            if let Some(name) = func.name.strip_prefix(INVARIANT_PREFIX) {
                if func.params.is_empty() && func.results == 1 {
                    invariants.insert(name.to_string());
                } else {
                    warn!(export = %func.name, "invariant export must take no parameters and return i32; skipped");
                }
                continue;
            }
            let Some(params) = params_for(&func.params) else {
                warn!(export = %func.name, "unsupported parameter type; export skipped");
                continue;
            };
            operations.push(OperationSpec::mutating(&func.name, params));
            param_types.insert(func.name.clone(), func.params);
        }

        let dictionary = harvest_constants(module.bytes());
        let mut instance = sandbox.instantiate(&module)?;
        let initial = instance.snapshot()?;

        let pool = ArrayQueue::new(config.max_pooled_instances.max(1));
        let _ = pool.push(instance);

        debug!(
            operations = operations.len(),
            invariants = invariants.len(),
            constants = dictionary.len(),
            "loaded WASM module"
        );

        Ok(Self {
            sandbox,
            module,
            operations,
            param_types,
            invariants,
            dictionary,
            initial,
            pool,
        })
    }

    /// Declarations for every `invariant_*` export.
    pub fn invariant_specs(&self) -> Vec<InvariantSpec> {
        self.invariants
            .iter()
            .map(|name| InvariantSpec::new(name))
            .collect()
    }

    /// An instance holding exactly `snapshot`.
    fn checkout(&self, snapshot: &WasmSnapshot) -> Result<SandboxInstance, AdapterFault> {
        if let Some(mut instance) = self.pool.pop() {
            if instance.restore(snapshot).map_err(corrupted)? {
                return Ok(instance);
            }
        }
        let mut instance = self
            .sandbox
            .instantiate(&self.module)
            .map_err(|e| AdapterFault::Unreachable {
                detail: e.to_string(),
            })?;
        if !instance.restore(snapshot).map_err(corrupted)? {
            return Err(AdapterFault::Corrupted {
                detail: "snapshot memory is smaller than a fresh instance".to_string(),
            });
        }
        Ok(instance)
    }

    fn checkin(&self, instance: SandboxInstance) {
        // A full pool just drops the instance.
        let _ = self.pool.push(instance);
    }
}

fn params_for(types: &[ValType]) -> Option<Vec<Param>> {
    types
        .iter()
        .enumerate()
        .map(|(i, ty)| {
            let domain = match ty {
                ValType::I32 => Domain::int(i64::from(i32::MIN), i64::from(i32::MAX)),
                ValType::I64 => Domain::unbounded_int(),
                _ => return None,
            };
            Some(Param::new(&format!("arg{i}"), domain))
        })
        .collect()
}

fn to_vals(types: &[ValType], args: &CallValue) -> Option<Vec<Val>> {
    if types.len() != args.len() {
        return None;
    }
    types
        .iter()
        .zip(args.args())
        .map(|(ty, arg)| match (ty, arg) {
            (ValType::I32, ArgValue::Int(v)) => i32::try_from(*v).ok().map(Val::I32),
            (ValType::I64, ArgValue::Int(v)) => Some(Val::I64(*v)),
            _ => None,
        })
        .collect()
}

fn corrupted(err: SandboxError) -> AdapterFault {
    AdapterFault::Corrupted {
        detail: err.to_string(),
    }
}

impl SutAdapter for WasmSut {
    type Snapshot = WasmSnapshot;

    fn operations(&self) -> &[OperationSpec] {
        &self.operations
    }

    fn new_instance(&self) -> Result<WasmSnapshot, AdapterFault> {
        Ok(self.initial.clone())
    }

    fn apply(
        &self,
        snapshot: &WasmSnapshot,
        call: &Invocation,
    ) -> Result<Transition<WasmSnapshot>, AdapterFault> {
        let types =
            self.param_types
                .get(&call.operation)
                .ok_or_else(|| AdapterFault::UnknownOperation {
                    operation: call.operation.clone(),
                })?;
        let args = to_vals(types, &call.args).ok_or_else(|| AdapterFault::Corrupted {
            detail: format!("arguments of {call} do not fit the export signature"),
        })?;

        let mut instance = self.checkout(snapshot)?;
        let transition = match instance.call_func(&call.operation, &args) {
            Ok(_) => Transition {
                snapshot: instance.snapshot().map_err(corrupted)?,
                status: CallStatus::Ok,
            },
            Err(SandboxError::Trap { message }) => Transition {
                snapshot: snapshot.clone(),
                status: CallStatus::Rejected { reason: message },
            },
            Err(SandboxError::FuelExhausted) => {
                self.checkin(instance);
                return Err(AdapterFault::Timeout {
                    operation: call.operation.clone(),
                });
            }
            Err(other) => {
                return Err(AdapterFault::Unreachable {
                    detail: other.to_string(),
                })
            }
        };
        self.checkin(instance);
        Ok(transition)
    }

    fn observe(
        &self,
        snapshot: &WasmSnapshot,
        invariant: &InvariantSpec,
    ) -> Result<bool, AdapterFault> {
        if !self.invariants.contains(&invariant.name) {
            return Err(AdapterFault::UnknownInvariant {
                invariant: invariant.name.clone(),
            });
        }
        let export = format!("{INVARIANT_PREFIX}{}", invariant.name);
        let mut instance = self.checkout(snapshot)?;
        let observed = instance.call_i32(&export);
        self.checkin(instance);

        match observed {
            Ok(value) => Ok(value != 0),
            Err(SandboxError::FuelExhausted) => Err(AdapterFault::Timeout { operation: export }),
            Err(SandboxError::Trap { message }) => Err(AdapterFault::Trap {
                context: format!("evaluating invariant '{}'", invariant.name),
                detail: message,
            }),
            Err(other) => Err(AdapterFault::Unreachable {
                detail: other.to_string(),
            }),
        }
    }

    fn has_invariant(&self, name: &str) -> bool {
        self.invariants.contains(name)
    }

    fn dictionary(&self) -> Vec<i64> {
        self.dictionary.clone()
    }

    fn fingerprint(&self, snapshot: &WasmSnapshot) -> Option<u64> {
        Some(snapshot.fingerprint())
    }

    fn describe(&self, snapshot: &WasmSnapshot) -> serde_json::Value {
        let globals: serde_json::Map<String, serde_json::Value> = snapshot
            .globals()
            .iter()
            .map(|g| (g.name.clone(), g.value.to_json()))
            .collect();
        serde_json::json!({
            "globals": globals,
            "memory_bytes": snapshot.memory_len(),
        })
    }
}
