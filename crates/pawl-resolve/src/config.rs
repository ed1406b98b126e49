use std::collections::BTreeSet;

use pawl_types::{ConstraintsFile, ResolveContext};

/// Resolver configuration for one resolve: the context-wide settings with any
/// per-resolve overrides applied. Overrides replace, they do not merge.
#[derive(Debug, Clone)]
pub struct ResolveConfig {
    pub manylinux: Option<String>,
    pub only_binary: BTreeSet<String>,
    pub no_binary: BTreeSet<String>,
    pub indexes: Vec<String>,
    pub extra_args: Vec<String>,
    pub constraints_file: Option<ConstraintsFile>,
}

impl ResolveConfig {
    pub fn for_resolve(ctx: &ResolveContext, resolve: &str) -> Self {
        Self {
            manylinux: ctx.manylinux.clone(),
            only_binary: ctx
                .resolves_to_only_binary
                .get(resolve)
                .unwrap_or(&ctx.only_binary)
                .clone(),
            no_binary: ctx
                .resolves_to_no_binary
                .get(resolve)
                .unwrap_or(&ctx.no_binary)
                .clone(),
            indexes: ctx.indexes.clone(),
            extra_args: ctx.extra_resolver_args.clone(),
            constraints_file: ctx
                .resolves_to_constraints_file
                .get(resolve)
                .or(ctx.constraints_file.as_ref())
                .cloned(),
        }
    }

    /// The resolver-config argv block: manylinux policy, binary policies,
    /// extra indexes, any passthrough args verbatim, and the constraints file
    /// last.
    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        match &self.manylinux {
            Some(platform) => args.push(format!("--manylinux={platform}")),
            None => args.push("--no-manylinux".to_string()),
        }
        for package in &self.only_binary {
            args.push(format!("--only-binary={package}"));
        }
        for package in &self.no_binary {
            args.push(format!("--no-binary={package}"));
        }
        for index in &self.indexes {
            args.push(format!("--index={index}"));
        }
        args.extend(self.extra_args.iter().cloned());
        if let Some(constraints) = &self.constraints_file {
            args.push(format!("--constraints={}", constraints.path));
        }
        args
    }
}
