//! Modules: named, ordered collections of gates sharing a legal domain.
//!
//! The module boundary is where gate faults stop. Whatever a gate does
//! (returns an error, panics), the module records an `ERROR` result for
//! it and carries on with its siblings.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::InputError;
use crate::catalog::CatalogError;
use crate::gate::{Gate, GateFault};
use crate::types::{GateEntry, GateResult, ModuleResult};

/// Static description of a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jurisdiction: Option<String>,
    pub version: String,
    /// Date the rule set was last reviewed against its legal sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reviewed: Option<chrono::NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ModuleInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            jurisdiction: None,
            version: version.into(),
            reviewed: None,
            description: None,
        }
    }
}

/// An ordered set of gates.
pub struct Module {
    info: ModuleInfo,
    gates: Vec<Arc<dyn Gate>>,
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module")
            .field("info", &self.info)
            .field("gates", &self.gate_ids())
            .finish()
    }
}

impl Module {
    pub fn new(info: ModuleInfo) -> Self {
        Self {
            info,
            gates: Vec::new(),
        }
    }

    /// Register a gate. Gate ids are unique within a module.
    pub fn register(&mut self, gate: Arc<dyn Gate>) -> Result<(), CatalogError> {
        if self.gate(gate.id()).is_some() {
            return Err(CatalogError::DuplicateGate {
                module: self.info.id.clone(),
                gate: gate.id().to_string(),
            });
        }
        self.gates.push(gate);
        Ok(())
    }

    pub fn with_gate(mut self, gate: Arc<dyn Gate>) -> Result<Self, CatalogError> {
        self.register(gate)?;
        Ok(self)
    }

    pub fn id(&self) -> &str {
        &self.info.id
    }

    pub fn info(&self) -> &ModuleInfo {
        &self.info
    }

    pub fn version(&self) -> &str {
        &self.info.version
    }

    /// Gates in registration order.
    pub fn gates(&self) -> &[Arc<dyn Gate>] {
        &self.gates
    }

    pub fn gate(&self, gate_id: &str) -> Option<&Arc<dyn Gate>> {
        self.gates.iter().find(|g| g.id() == gate_id)
    }

    pub fn gate_ids(&self) -> Vec<&str> {
        self.gates.iter().map(|g| g.id()).collect()
    }

    /// Run every gate in order, passing each raw result through `post`.
    pub fn evaluate_with<F>(&self, text: &str, document_type: &str, mut post: F) -> ModuleResult
    where
        F: FnMut(&dyn Gate, GateResult) -> GateResult,
    {
        let gates = self
            .gates
            .iter()
            .map(|gate| {
                let raw = isolate(&self.info.id, gate.as_ref(), text, document_type);
                GateEntry {
                    gate_id: gate.id().to_string(),
                    result: post(gate.as_ref(), raw),
                }
            })
            .collect();
        ModuleResult::new(&self.info.id, &self.info.version, gates)
    }

    /// Run every gate in order without post-processing.
    pub fn evaluate(&self, text: &str, document_type: &str) -> ModuleResult {
        self.evaluate_with(text, document_type, |_, result| result)
    }
}

/// Evaluate one gate, converting faults and panics into `ERROR` results.
pub fn isolate(module_id: &str, gate: &dyn Gate, text: &str, document_type: &str) -> GateResult {
    let outcome = catch_unwind(AssertUnwindSafe(|| gate.evaluate(text, document_type)))
        .unwrap_or_else(|payload| Err(GateFault::Panic(panic_message(payload.as_ref()))));

    match outcome {
        Ok(result) => result,
        Err(fault) => fault_result(module_id, gate.id(), &fault),
    }
}

/// The `ERROR` result recorded for a faulted gate.
pub fn fault_result(module_id: &str, gate_id: &str, fault: &GateFault) -> GateResult {
    warn!(module = %module_id, gate = %gate_id, error = %fault, "Gate fault isolated");
    GateResult::error(fault.to_string())
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Read-only registry of modules in load order.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: Vec<Module>,
    index: BTreeMap<String, usize>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Module) -> Result<(), CatalogError> {
        if self.index.contains_key(module.id()) {
            return Err(CatalogError::DuplicateModule(module.id().to_string()));
        }
        self.index.insert(module.id().to_string(), self.modules.len());
        self.modules.push(module);
        Ok(())
    }

    pub fn get(&self, module_id: &str) -> Option<&Module> {
        self.index.get(module_id).map(|&i| &self.modules[i])
    }

    pub fn modules(&self) -> &[Module] {
        &self.modules
    }

    pub fn ids(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.id().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Resolve requested module ids to modules, in request order.
    ///
    /// `None` or an empty list selects every loaded module in load order.
    /// Repeated ids are evaluated once.
    pub fn resolve(&self, requested: Option<&[String]>) -> Result<Vec<&Module>, InputError> {
        let Some(ids) = requested.filter(|ids| !ids.is_empty()) else {
            return Ok(self.modules.iter().collect());
        };

        let mut resolved: Vec<&Module> = Vec::with_capacity(ids.len());
        for id in ids {
            let module = self
                .get(id)
                .ok_or_else(|| InputError::UnknownModule(id.clone()))?;
            if !resolved.iter().any(|m| m.id() == module.id()) {
                resolved.push(module);
            }
        }
        Ok(resolved)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::gate::GateMetadata;
    use crate::types::{Severity, Status};

    /// Gate returning a fixed result.
    pub(crate) struct FixedGate {
        pub meta: GateMetadata,
        pub result: GateResult,
    }

    impl FixedGate {
        pub(crate) fn new(id: &str, result: GateResult) -> Arc<dyn Gate> {
            Arc::new(Self {
                meta: GateMetadata::new(id, id, result.severity),
                result,
            })
        }
    }

    impl Gate for FixedGate {
        fn metadata(&self) -> &GateMetadata {
            &self.meta
        }

        fn check(&self, _text: &str, _document_type: &str) -> Result<GateResult, GateFault> {
            Ok(self.result.clone())
        }
    }

    /// Gate that always panics.
    pub(crate) struct PanickingGate(pub GateMetadata);

    impl Gate for PanickingGate {
        fn metadata(&self) -> &GateMetadata {
            &self.0
        }

        fn check(&self, _text: &str, _document_type: &str) -> Result<GateResult, GateFault> {
            panic!("regex table corrupted")
        }
    }

    struct FaultingGate(GateMetadata);

    impl Gate for FaultingGate {
        fn metadata(&self) -> &GateMetadata {
            &self.0
        }

        fn check(&self, _text: &str, _document_type: &str) -> Result<GateResult, GateFault> {
            Err(GateFault::Check("lookup table missing".into()))
        }
    }

    fn module() -> Module {
        Module::new(ModuleInfo::new("test", "Test", "1.0.0"))
            .with_gate(FixedGate::new("first", GateResult::pass("ok")))
            .unwrap()
            .with_gate(Arc::new(PanickingGate(GateMetadata::new(
                "boom",
                "Boom",
                Severity::High,
            ))))
            .unwrap()
            .with_gate(Arc::new(FaultingGate(GateMetadata::new(
                "broken",
                "Broken",
                Severity::Low,
            ))))
            .unwrap()
            .with_gate(FixedGate::new(
                "last",
                GateResult::fail(Severity::Medium, "bad"),
            ))
            .unwrap()
    }

    #[test]
    fn test_faults_are_isolated() {
        let result = module().evaluate("anything", "general");
        let statuses: Vec<_> = result.gates.iter().map(|g| g.result.status).collect();
        assert_eq!(
            statuses,
            vec![Status::Pass, Status::Error, Status::Error, Status::Fail]
        );
        assert!(result.gates[1].result.message.contains("regex table corrupted"));
        assert!(result.gates[2].result.message.contains("lookup table missing"));
        assert_eq!(result.summary.error, 2);
    }

    #[test]
    fn test_duplicate_gate_rejected() {
        let err = Module::new(ModuleInfo::new("m", "M", "1"))
            .with_gate(FixedGate::new("g", GateResult::pass("ok")))
            .unwrap()
            .with_gate(FixedGate::new("g", GateResult::pass("ok")))
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateGate { .. }));
    }

    #[test]
    fn test_registry_resolve() {
        let mut registry = ModuleRegistry::new();
        registry.register(Module::new(ModuleInfo::new("a", "A", "1"))).unwrap();
        registry.register(Module::new(ModuleInfo::new("b", "B", "1"))).unwrap();

        let all = registry.resolve(None).unwrap();
        assert_eq!(all.len(), 2);

        let requested = vec!["b".to_string(), "a".to_string(), "b".to_string()];
        let picked: Vec<_> = registry
            .resolve(Some(&requested))
            .unwrap()
            .iter()
            .map(|m| m.id().to_string())
            .collect();
        assert_eq!(picked, vec!["b", "a"]);

        let unknown = vec!["zz".to_string()];
        assert!(matches!(
            registry.resolve(Some(&unknown)),
            Err(InputError::UnknownModule(_))
        ));

        assert!(matches!(
            registry.register(Module::new(ModuleInfo::new("a", "A", "2"))),
            Err(CatalogError::DuplicateModule(_))
        ));
    }
}
