use thiserror::Error;

use crate::types::MethodBody;

use super::assemble::Assembler;
use super::cfg;
use super::cleanup;
use super::error::StructureError;
use super::stack_sim::Simulator;
use super::structured_types::StructuredBody;
use super::structuring::RegionDecomposer;
use super::ternary;

/// Error type for structuring failures.
#[derive(Error, Clone, Debug, PartialEq)]
pub enum DecompileError {
    /// The method has no instructions (abstract, native or empty).
    #[error("method '{0}' has no code to structure")]
    NoCode(String),
    /// A specific method failed to structure.
    #[error("failed to structure method '{method_name}': {source}")]
    Method {
        method_name: String,
        #[source]
        source: StructureError,
    },
}

impl DecompileError {
    /// Unsupported constructs and code-less methods are skipped, not failed.
    pub fn is_skippable(&self) -> bool {
        match self {
            DecompileError::NoCode(_) => true,
            DecompileError::Method { source, .. } => source.is_skippable(),
        }
    }
}

/// Options controlling which passes run.
#[derive(Clone, Debug)]
pub struct StructureOptions {
    /// Collapse value-producing branch spans into conditional expressions.
    /// When off, methods containing one fail as malformed.
    pub detect_ternaries: bool,
    pub rewrite_for_loops: bool,
    /// Fold `else { if ... }` into `else if` arms.
    pub collapse_else_if: bool,
    /// End the last catch body where its local goes out of scope.
    pub catch_scope_fallback: bool,
    /// Split statement prefixes off jump blocks before decomposition.
    pub split_condition_headers: bool,
}

impl Default for StructureOptions {
    fn default() -> Self {
        Self {
            detect_ternaries: true,
            rewrite_for_loops: true,
            collapse_else_if: true,
            catch_scope_fallback: true,
            split_condition_headers: true,
        }
    }
}

/// A successfully structured method.
#[derive(Clone, Debug, PartialEq)]
pub struct StructuredMethod {
    pub name: String,
    pub body: StructuredBody,
    /// A catch body's end was taken from its local's scope.
    pub used_catch_scope_fallback: bool,
}

/// Outcome of structuring many methods.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub structured: Vec<StructuredMethod>,
    /// Methods without code or with constructs the structurer declines.
    pub skipped: Vec<DecompileError>,
    pub failed: Vec<DecompileError>,
}

/// The structuring entry point.
pub struct Structurer {
    options: StructureOptions,
}

impl Structurer {
    pub fn new(options: StructureOptions) -> Self {
        Self { options }
    }

    /// Structure one method body.
    pub fn structure_method(&self, method: &MethodBody) -> Result<StructuredMethod, DecompileError> {
        if !method.has_code() {
            return Err(DecompileError::NoCode(method.name.clone()));
        }
        let wrap = |source: StructureError| DecompileError::Method {
            method_name: method.name.clone(),
            source,
        };
        let (body, used_catch_scope_fallback) = self.run_pipeline(method).map_err(wrap)?;
        Ok(StructuredMethod {
            name: method.name.clone(),
            body,
            used_catch_scope_fallback,
        })
    }

    fn run_pipeline(&self, method: &MethodBody) -> Result<(StructuredBody, bool), StructureError> {
        let labels = method.label_positions();
        let sim = Simulator::new(method, &labels);

        let mut graph = cfg::build_graph(method)?;
        log::debug!("{}{}: {} blocks, {} try regions", method.name, method.descriptor, graph.len(), graph.regions.len());
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("block graph of {}:\n{}", method.name, graph.to_dot());
        }

        cleanup::cleanup(&mut graph, self.options.split_condition_headers)?;
        ternary::collapse_ternaries(&mut graph, &sim, self.options.detect_ternaries)?;
        graph.populate_targeted_by();
        graph.check_invariants()?;

        let mut decomposer = RegionDecomposer::new(&mut graph, &sim, &method.local_variables, &self.options);
        let sections = decomposer.decompose()?;
        let used_fallback = decomposer.used_catch_scope_fallback;

        let body = Assembler::new(&sim, self.options.rewrite_for_loops).assemble(sections)?;
        if log::log_enabled!(log::Level::Debug) {
            let mut total = 0;
            body.walk(&mut |_| total += 1);
            log::debug!("{}: {} statements, {} at top level", method.name, total, body.statements.len());
        }
        Ok((body, used_fallback))
    }

    /// Structure every method, continuing past failures.
    pub fn structure_all(&self, methods: &[MethodBody]) -> BatchReport {
        let mut report = BatchReport::default();
        for method in methods {
            match self.structure_method(method) {
                Ok(structured) => report.structured.push(structured),
                Err(err) if err.is_skippable() => {
                    log::warn!("skipping {}", err);
                    report.skipped.push(err);
                }
                Err(err) => {
                    log::warn!("{}", err);
                    report.failed.push(err);
                }
            }
        }
        log::debug!(
            "structured {} methods, skipped {}, failed {}",
            report.structured.len(),
            report.skipped.len(),
            report.failed.len()
        );
        report
    }
}

impl Default for Structurer {
    fn default() -> Self {
        Self::new(StructureOptions::default())
    }
}
