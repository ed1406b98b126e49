use std::collections::BTreeSet;

use itertools::Itertools;
use thiserror::Error;

use pawl_requirements::InterpreterConstraints;
use pawl_types::ResolveContext;

use crate::generate::GenerateLockfile;

/// Sentinel destination for a tool resolve that ships with a built-in
/// lockfile instead of a user-managed path.
pub const DEFAULT_TOOL_LOCKFILE: &str = "<default>";

/// A bundled tool that owns a resolve of its own unless redirected or
/// shadowed. Descriptors are supplied by the embedding application at
/// composition time; nothing here is discovered dynamically.
#[derive(Debug, Clone)]
pub struct ToolResolveDescriptor {
    pub name: String,
    /// The tool's pinned requirement strings.
    pub default_requirements: Vec<String>,
    /// User-set constraints, when the tool exposes that option at all. `None`
    /// means the option does not exist for this tool, so the tool default
    /// applies unconditionally; the context-wide constraints are never
    /// consulted for tool resolves.
    pub interpreter_constraints: Option<InterpreterConstraints>,
    pub default_interpreter_constraints: InterpreterConstraints,
    /// When set, the tool installs from this user resolve and does not own a
    /// lockfile of its own.
    pub redirect_target: Option<String>,
}

impl ToolResolveDescriptor {
    fn effective_interpreter_constraints(&self) -> &InterpreterConstraints {
        self.interpreter_constraints
            .as_ref()
            .unwrap_or(&self.default_interpreter_constraints)
    }
}

/// A requirement declaration from the build graph, already flattened to the
/// strings it contributes and the resolve they belong to.
#[derive(Debug, Clone)]
pub struct RequirementSource {
    pub requirements: Vec<String>,
    /// `None` falls back to the context's default resolve.
    pub resolve: Option<String>,
    pub find_links: Vec<String>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("Unrecognized resolve name `{name}`. Available resolves: {available}.")]
    UnknownResolve { name: String, available: String },
}

/// Every resolve name that can be asked for: user-declared resolves plus the
/// resolves of tools that are neither redirected nor shadowed. A user resolve
/// with the same name as a tool takes the name over entirely.
pub fn known_resolve_names(
    ctx: &ResolveContext,
    tools: &[ToolResolveDescriptor],
) -> BTreeSet<String> {
    let mut names: BTreeSet<String> = ctx.resolves.keys().cloned().collect();
    names.extend(
        tools
            .iter()
            .filter(|tool| tool.redirect_target.is_none())
            .map(|tool| tool.name.clone()),
    );
    names
}

/// Build one [`GenerateLockfile`] request per requested name.
///
/// User resolves take the union of the requirement strings of every source
/// declared for them. Find-links URLs are unioned across *all* sources
/// regardless of resolve; a link registered anywhere is available everywhere.
pub fn requests_for(
    names: &[String],
    sources: &[RequirementSource],
    tools: &[ToolResolveDescriptor],
    ctx: &ResolveContext,
    diff: bool,
) -> Result<Vec<GenerateLockfile>, RegistryError> {
    let all_find_links: BTreeSet<String> = sources
        .iter()
        .flat_map(|source| source.find_links.iter().cloned())
        .collect();

    let mut requests = Vec::new();
    for name in names {
        if let Some(lockfile_dest) = ctx.resolves.get(name) {
            let requirements: BTreeSet<String> = sources
                .iter()
                .filter(|source| source.resolve.as_ref().unwrap_or(&ctx.default_resolve) == name)
                .flat_map(|source| source.requirements.iter().cloned())
                .collect();
            requests.push(GenerateLockfile {
                resolve_name: name.clone(),
                requirements,
                find_links: all_find_links.clone(),
                interpreter_constraints: ctx.interpreter_constraints_for(name).clone(),
                lockfile_dest: lockfile_dest.clone(),
                diff,
                previous_lockfile: None,
            });
        } else if let Some(tool) = tools
            .iter()
            .find(|tool| tool.redirect_target.is_none() && tool.name == *name)
        {
            requests.push(GenerateLockfile {
                resolve_name: tool.name.clone(),
                requirements: tool.default_requirements.iter().cloned().collect(),
                find_links: all_find_links.clone(),
                interpreter_constraints: tool.effective_interpreter_constraints().clone(),
                lockfile_dest: DEFAULT_TOOL_LOCKFILE.to_string(),
                diff,
                previous_lockfile: None,
            });
        } else {
            return Err(RegistryError::UnknownResolve {
                name: name.clone(),
                available: known_resolve_names(ctx, tools).iter().join(", "),
            });
        }
    }
    Ok(requests)
}
