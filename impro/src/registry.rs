//! Engine registry.
//!
//! A registry is built once, then shared read-only (behind an `Arc`) by every
//! pipeline created from it. Registration order is priority order: when
//! several engines can carry out a run, the one registered first wins.

use std::collections::HashMap;
use std::ops::Range;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::config::ImproConfig;
use crate::operation::{Arg, Operation};
use crate::pipeline::Pipeline;
use crate::{Error, Result};

/// Static capabilities of an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineDescriptor {
    pub name: String,
    /// Set when the engine cannot run on this host (e.g. missing binary).
    pub unavailable: bool,
    pub operations: Vec<String>,
    /// Accepted input types; `*` accepts anything.
    pub input_types: Vec<String>,
    /// Types the engine can produce. Each one is also a type-selector
    /// operation the engine supports.
    pub output_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_output_type: Option<String>,
}

impl EngineDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            unavailable: false,
            operations: Vec::new(),
            input_types: Vec::new(),
            output_types: Vec::new(),
            default_output_type: None,
        }
    }

    pub fn operations<I, S>(mut self, operations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.operations.extend(operations.into_iter().map(Into::into));
        self
    }

    pub fn input_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.input_types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn output_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.output_types.extend(types.into_iter().map(Into::into));
        self
    }

    pub fn default_output_type(mut self, type_name: impl Into<String>) -> Self {
        self.default_output_type = Some(type_name.into());
        self
    }

    pub fn unavailable(mut self, unavailable: bool) -> Self {
        self.unavailable = unavailable;
        self
    }

    /// Whether the engine can carry out an operation of this name.
    pub fn supports(&self, operation: &str) -> bool {
        self.name == operation
            || self.operations.iter().any(|o| o == operation)
            || self.can_output(operation)
    }

    pub fn accepts_any_input(&self) -> bool {
        self.input_types.iter().any(|t| t == media_types::ANY_TYPE)
    }

    pub fn accepts_input(&self, type_name: &str) -> bool {
        self.accepts_any_input() || self.input_types.iter().any(|t| t == type_name)
    }

    pub fn can_output(&self, type_name: &str) -> bool {
        self.output_types.iter().any(|t| t == type_name)
    }

    /// Whether the engine is usable while the pipeline targets `target_type`.
    pub fn compatible_with(&self, target_type: Option<&str>) -> bool {
        if self.accepts_any_input() {
            return true;
        }
        target_type.is_some_and(|t| {
            self.input_types.iter().any(|i| i == t) || self.default_output_type.is_some()
        })
    }
}

/// One run of operations bound to an engine, as handed to [`Engine::execute`].
#[derive(Debug, Clone, PartialEq)]
pub struct EngineRun {
    pub engine: String,
    /// Operations to carry out, without a leading engine selection.
    pub operations: Vec<Operation>,
    /// The configuration argument of an explicit engine selection.
    pub options: Option<Arg>,
    /// Position of the run in the pipeline's operation queue.
    pub range: Range<usize>,
    pub input_type: Option<String>,
    pub output_type: Option<String>,
}

impl EngineRun {
    /// Arguments of the last operation with this name in the run.
    pub fn last_args(&self, name: &str) -> Option<&[Arg]> {
        self.operations
            .iter()
            .rev()
            .find(|op| op.name == name)
            .map(|op| op.args.as_slice())
    }

    pub fn has(&self, name: &str) -> bool {
        self.operations.iter().any(|op| op.name == name)
    }

    /// Look up a key of the engine options map.
    pub fn option(&self, key: &str) -> Option<&Arg> {
        self.options.as_ref()?.as_map()?.get(key)
    }
}

/// A pluggable image engine.
pub trait Engine: Send + Sync + 'static {
    fn descriptor(&self) -> &EngineDescriptor;

    fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Check the arguments of an operation this engine supports.
    ///
    /// `None` defers to the default rule: only zero-argument calls are valid.
    fn validate_operation(&self, name: &str, args: &[Arg]) -> Option<bool> {
        let _ = (name, args);
        None
    }

    /// Append one or more stages carrying out `run` to `pipeline`.
    ///
    /// Process-backed engines return the command-line arguments they built.
    fn execute(&self, pipeline: &mut Pipeline, run: &EngineRun) -> Result<Option<Vec<String>>>;
}

/// Immutable engine table plus the operation lookup derived from it.
pub struct EngineRegistry {
    engines: Vec<Arc<dyn Engine>>,
    by_name: HashMap<String, usize>,
    /// Operation name to the indices of the engines supporting it, in
    /// priority order.
    operations: HashMap<String, Vec<usize>>,
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.engine_names())
            .finish()
    }
}

#[derive(Default)]
pub struct EngineRegistryBuilder {
    engines: Vec<Arc<dyn Engine>>,
}

impl EngineRegistryBuilder {
    pub fn register<E: Engine>(mut self, engine: E) -> Self {
        self.engines.push(Arc::new(engine));
        self
    }

    pub fn build(self) -> Result<EngineRegistry> {
        let mut by_name = HashMap::with_capacity(self.engines.len());
        let mut operations: HashMap<String, Vec<usize>> = HashMap::new();

        for (index, engine) in self.engines.iter().enumerate() {
            let descriptor = engine.descriptor();
            if by_name.insert(descriptor.name.clone(), index).is_some() {
                return Err(Error::config(format!(
                    "engine {} registered twice",
                    descriptor.name
                )));
            }

            let supported = std::iter::once(&descriptor.name)
                .chain(&descriptor.operations)
                .chain(&descriptor.output_types);
            for operation in supported {
                let engines = operations.entry(operation.clone()).or_default();
                if engines.last() != Some(&index) {
                    engines.push(index);
                }
            }

            debug!(
                engine = %descriptor.name,
                priority = index,
                unavailable = descriptor.unavailable,
                "Registered engine"
            );
        }

        Ok(EngineRegistry {
            engines: self.engines,
            by_name,
            operations,
        })
    }
}

impl EngineRegistry {
    pub fn builder() -> EngineRegistryBuilder {
        EngineRegistryBuilder::default()
    }

    /// Register the built-in engines listed in `config.engines`, in order.
    pub fn with_defaults(config: &ImproConfig) -> Result<Self> {
        crate::engines::register_defaults(Self::builder(), config)?.build()
    }

    pub fn engine(&self, name: &str) -> Option<&Arc<dyn Engine>> {
        self.by_name.get(name).map(|&i| &self.engines[i])
    }

    pub fn engine_at(&self, index: usize) -> Option<&Arc<dyn Engine>> {
        self.engines.get(index)
    }

    pub fn engine_names(&self) -> Vec<&str> {
        self.engines.iter().map(|e| e.name()).collect()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &EngineDescriptor> {
        self.engines.iter().map(|e| e.descriptor())
    }

    pub fn is_engine(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn supports_operation(&self, name: &str) -> bool {
        self.operations.contains_key(name)
    }

    /// Indices of the engines supporting `name`, in priority order.
    pub fn engines_supporting(&self, name: &str) -> &[usize] {
        self.operations.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether `name` selects an output type.
    pub fn is_type_selector(&self, name: &str) -> bool {
        media_types::is_type_name(name)
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::StubEngine;

    fn registry() -> EngineRegistry {
        EngineRegistry::builder()
            .register(StubEngine::new(
                EngineDescriptor::new("gifsicle")
                    .operations(["resize", "crop"])
                    .input_types(["gif"])
                    .output_types(["gif"]),
            ))
            .register(StubEngine::new(
                EngineDescriptor::new("gm")
                    .operations(["resize", "crop", "rotate"])
                    .input_types(["*"])
                    .output_types(["gif", "png", "jpeg"]),
            ))
            .build()
            .unwrap()
    }

    #[test]
    fn test_operation_table_is_in_priority_order() {
        let registry = registry();
        assert_eq!(registry.engines_supporting("resize"), &[0, 1]);
        assert_eq!(registry.engines_supporting("rotate"), &[1]);
        assert_eq!(registry.engines_supporting("gif"), &[0, 1]);
        assert_eq!(registry.engines_supporting("gm"), &[1]);
        assert!(registry.engines_supporting("sharpen").is_empty());
        assert_eq!(registry.engine_names(), vec!["gifsicle", "gm"]);
    }

    #[test]
    fn test_queries() {
        let registry = registry();
        assert!(registry.is_engine("gm"));
        assert!(!registry.is_engine("resize"));
        assert!(registry.supports_operation("png"));
        assert!(registry.is_type_selector("png"));
        assert!(!registry.is_type_selector("resize"));
        assert_eq!(registry.engine("gm").map(|e| e.name()), Some("gm"));
    }

    #[test]
    fn test_duplicate_names_are_rejected() {
        let result = EngineRegistry::builder()
            .register(StubEngine::new(EngineDescriptor::new("gm")))
            .register(StubEngine::new(EngineDescriptor::new("gm")))
            .build();
        assert_eq!(result.unwrap_err().kind(), crate::ErrorKind::Configuration);
    }

    #[test]
    fn test_type_compatibility() {
        let wildcard = EngineDescriptor::new("gm").input_types(["*"]);
        assert!(wildcard.compatible_with(None));

        let gif_only = EngineDescriptor::new("gifsicle").input_types(["gif"]);
        assert!(!gif_only.compatible_with(None));
        assert!(gif_only.compatible_with(Some("gif")));
        assert!(!gif_only.compatible_with(Some("png")));

        let converter = EngineDescriptor::new("inkscape")
            .input_types(["svg"])
            .default_output_type("png");
        assert!(converter.compatible_with(Some("jpeg")));
        assert!(!converter.compatible_with(None));
    }
}
