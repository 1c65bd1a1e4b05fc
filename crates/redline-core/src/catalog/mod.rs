//! The process-wide catalog: modules, semantic rules, sanitizer rules,
//! domain taxonomy, snippet library and analyzers.
//!
//! Everything here is configuration data. The built-in packs are compiled
//! into the binary; a directory with the same layout overrides them:
//!
//! ```text
//! <dir>/packs/*.yaml      rule packs (one module each, loaded in file-name order)
//! <dir>/semantic.yaml     semantic escalation rules
//! <dir>/sanitizer.yaml    sanitizer rewrite rules
//! <dir>/domains.yaml      domain taxonomy and gate bindings
//! <dir>/snippets.yaml     snippet library
//! ```
//!
//! Any file missing from the directory falls back to the built-in one.
//! The catalog is built once and read-only afterwards.

mod pack;
mod schema;

pub use pack::{GateDefinition, GateMessages, MissingOutcome, PatternDefinition, RulePack};
pub use schema::validate_rule_pack;

use std::fs;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tracing::{debug, info};

use crate::analyzers::{Analyzer, PiiAnalyzer};
use crate::correction::{DomainTaxonomy, Sanitizer, SnippetRegistry};
use crate::module::{Module, ModuleRegistry};
use crate::semantic::{SemanticAugmentor, SemanticConfig};

/// Built-in rule packs, in load order.
const BUILTIN_PACKS: &[(&str, &str)] = &[
    ("fca_uk.yaml", include_str!("../../packs/fca_uk.yaml")),
    ("gdpr_uk.yaml", include_str!("../../packs/gdpr_uk.yaml")),
    ("hipaa_us.yaml", include_str!("../../packs/hipaa_us.yaml")),
];
const BUILTIN_SEMANTIC: &str = include_str!("../../packs/semantic.yaml");
const BUILTIN_SANITIZER: &str = include_str!("../../packs/sanitizer.yaml");
const BUILTIN_DOMAINS: &str = include_str!("../../packs/domains.yaml");
const BUILTIN_SNIPPETS: &str = include_str!("../../packs/snippets.yaml");

/// Errors raised while loading configuration.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to decode configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Rule pack {source_name} failed schema validation: {}", errors.join("; "))]
    Schema {
        source_name: String,
        errors: Vec<String>,
    },

    #[error("Failed to load schema: {0}")]
    SchemaLoad(String),

    #[error("Invalid pattern {pattern:?}: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Gate {gate} registered twice in module {module}")]
    DuplicateGate { module: String, gate: String },

    #[error("Module {0} registered twice")]
    DuplicateModule(String),

    #[error("{owner} references unknown domain {domain}")]
    UnknownDomain { owner: String, domain: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Built-in catalog failed to load: {0}")]
    Builtin(String),
}

/// Read-only registries shared by every evaluation.
pub struct Catalog {
    modules: ModuleRegistry,
    augmentor: SemanticAugmentor,
    sanitizer: Sanitizer,
    taxonomy: DomainTaxonomy,
    snippets: SnippetRegistry,
    analyzers: Vec<Box<dyn Analyzer>>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog")
            .field("modules", &self.modules.ids())
            .field("sanitizer_rules", &self.sanitizer.rule_ids())
            .field("snippets", &self.snippets.len())
            .field("analyzers", &self.analyzers.iter().map(|a| a.name()).collect::<Vec<_>>())
            .finish()
    }
}

static BUILTIN: OnceLock<Result<Arc<Catalog>, String>> = OnceLock::new();

impl Catalog {
    /// The built-in catalog, built on first use and shared.
    pub fn builtin() -> Result<Arc<Catalog>, CatalogError> {
        BUILTIN
            .get_or_init(|| {
                CatalogBuilder::from_builtin()
                    .and_then(CatalogBuilder::build)
                    .map(Arc::new)
                    .map_err(|e| e.to_string())
            })
            .clone()
            .map_err(CatalogError::Builtin)
    }

    /// Load a catalog from a configuration directory.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Catalog, CatalogError> {
        let dir = dir.as_ref();
        if !dir.is_dir() {
            return Err(io_error(
                dir,
                std::io::Error::new(std::io::ErrorKind::NotFound, "not a directory"),
            ));
        }
        let mut builder = CatalogBuilder::new();

        let packs_dir = dir.join("packs");
        if packs_dir.is_dir() {
            let mut paths: Vec<_> = fs::read_dir(&packs_dir)
                .map_err(|e| io_error(&packs_dir, e))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| matches!(p.extension().and_then(|e| e.to_str()), Some("yaml" | "yml")))
                .collect();
            paths.sort();
            for path in paths {
                debug!(path = %path.display(), "Loading rule pack");
                builder = builder.pack_yaml(&read(&path)?)?;
            }
        } else {
            builder = builder.builtin_packs()?;
        }

        builder = builder
            .semantic_yaml(&read_or(dir.join("semantic.yaml"), BUILTIN_SEMANTIC)?)?
            .sanitizer_yaml(&read_or(dir.join("sanitizer.yaml"), BUILTIN_SANITIZER)?)?
            .domains_yaml(&read_or(dir.join("domains.yaml"), BUILTIN_DOMAINS)?)?
            .snippets_yaml(&read_or(dir.join("snippets.yaml"), BUILTIN_SNIPPETS)?)?
            .analyzer(Box::new(PiiAnalyzer));

        let catalog = builder.build()?;
        info!(dir = %dir.display(), modules = catalog.modules.len(), "Catalog loaded");
        Ok(catalog)
    }

    pub fn modules(&self) -> &ModuleRegistry {
        &self.modules
    }

    pub fn augmentor(&self) -> &SemanticAugmentor {
        &self.augmentor
    }

    pub fn sanitizer(&self) -> &Sanitizer {
        &self.sanitizer
    }

    pub fn taxonomy(&self) -> &DomainTaxonomy {
        &self.taxonomy
    }

    pub fn snippets(&self) -> &SnippetRegistry {
        &self.snippets
    }

    pub fn analyzers(&self) -> &[Box<dyn Analyzer>] {
        &self.analyzers
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CatalogError {
    CatalogError::Io {
        path: path.display().to_string(),
        source,
    }
}

fn read(path: &Path) -> Result<String, CatalogError> {
    fs::read_to_string(path).map_err(|e| io_error(path, e))
}

fn read_or(path: impl AsRef<Path>, fallback: &str) -> Result<String, CatalogError> {
    let path = path.as_ref();
    if path.is_file() {
        read(path)
    } else {
        Ok(fallback.to_string())
    }
}

/// Assembles a [`Catalog`] piece by piece.
#[derive(Default)]
pub struct CatalogBuilder {
    modules: ModuleRegistry,
    semantic: SemanticConfig,
    sanitizer: Sanitizer,
    taxonomy: DomainTaxonomy,
    snippets: SnippetRegistry,
    analyzers: Vec<Box<dyn Analyzer>>,
}

impl CatalogBuilder {
    /// An empty builder: no modules, rules or analyzers.
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder preloaded with the built-in configuration.
    pub fn from_builtin() -> Result<Self, CatalogError> {
        Self::new()
            .builtin_packs()?
            .semantic_yaml(BUILTIN_SEMANTIC)?
            .sanitizer_yaml(BUILTIN_SANITIZER)?
            .domains_yaml(BUILTIN_DOMAINS)?
            .snippets_yaml(BUILTIN_SNIPPETS)
            .map(|b| b.analyzer(Box::new(PiiAnalyzer)))
    }

    fn builtin_packs(mut self) -> Result<Self, CatalogError> {
        for (name, yaml) in BUILTIN_PACKS {
            debug!(pack = %name, "Loading built-in rule pack");
            self = self.pack_yaml(yaml)?;
        }
        Ok(self)
    }

    pub fn module(mut self, module: Module) -> Result<Self, CatalogError> {
        self.modules.register(module)?;
        Ok(self)
    }

    pub fn pack_yaml(self, yaml: &str) -> Result<Self, CatalogError> {
        self.module(RulePack::from_yaml(yaml)?.into_module()?)
    }

    pub fn semantic_yaml(mut self, yaml: &str) -> Result<Self, CatalogError> {
        self.semantic = SemanticConfig::from_yaml(yaml)?;
        Ok(self)
    }

    pub fn sanitizer_yaml(mut self, yaml: &str) -> Result<Self, CatalogError> {
        self.sanitizer = Sanitizer::from_yaml(yaml)?;
        Ok(self)
    }

    pub fn domains_yaml(mut self, yaml: &str) -> Result<Self, CatalogError> {
        self.taxonomy = DomainTaxonomy::from_yaml(yaml)?;
        Ok(self)
    }

    pub fn snippets_yaml(mut self, yaml: &str) -> Result<Self, CatalogError> {
        self.snippets = SnippetRegistry::from_yaml(yaml)?;
        Ok(self)
    }

    pub fn analyzer(mut self, analyzer: Box<dyn Analyzer>) -> Self {
        self.analyzers.push(analyzer);
        self
    }

    /// Check cross-references and freeze the catalog.
    pub fn build(self) -> Result<Catalog, CatalogError> {
        let owners = self
            .sanitizer
            .domains()
            .map(|(id, domain)| (format!("sanitizer rule {}", id), domain))
            .chain(
                self.snippets
                    .domains()
                    .map(|(id, domain)| (format!("snippet {}", id), domain)),
            );
        for (owner, domain) in owners {
            if self.taxonomy.domain(domain).is_none() {
                return Err(CatalogError::UnknownDomain {
                    owner,
                    domain: domain.to_string(),
                });
            }
        }

        Ok(Catalog {
            modules: self.modules,
            augmentor: SemanticAugmentor::new(self.semantic),
            sanitizer: self.sanitizer,
            taxonomy: self.taxonomy,
            snippets: self.snippets,
            analyzers: self.analyzers,
        })
    }
}
