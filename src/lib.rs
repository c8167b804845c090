//! Compiler front end and mid-end for the rill systems language: parsing
//! into an arena AST, lazy multi-pass semantic analysis with static
//! conditional expansion, and SSA IR construction.

pub mod context;
pub mod diag;
pub mod frontend;
pub mod index;
pub mod middle;

use context::CompilationContext;
use diag::CompileResult;
use frontend::{parser, SourceFile};
use middle::driver;

/// Enabled `#version` identifiers for one invocation
#[derive(Debug, Default, Clone, Copy)]
pub struct CompileOptions {
    pub enabled_versions: u32,
}

impl CompileOptions {
    pub const VERSION_WINDOWS: u32 = 1 << 0;
    pub const VERSION_LINUX: u32 = 1 << 1;
    pub const VERSION_MACOS: u32 = 1 << 2;

    pub fn with_version(mut self, name: &str) -> Self {
        match name {
            "windows" => self.enabled_versions |= Self::VERSION_WINDOWS,
            "linux" => self.enabled_versions |= Self::VERSION_LINUX,
            "macos" => self.enabled_versions |= Self::VERSION_MACOS,
            _ => {}
        }
        self
    }
}

/// Runs the whole pipeline over a set of source files. The context with all
/// arenas, diagnostics and generated IR is returned either way; `Err` means
/// an unrecoverable error aborted the invocation.
pub fn compile(
    sources: Vec<SourceFile>,
    options: CompileOptions,
) -> (CompilationContext, CompileResult<()>) {
    let mut ctx = CompilationContext::new(options.enabled_versions);

    let result = (|| {
        for source in sources {
            let (file_id, _) = ctx.add_file(source);
            let module = parser::parse_file(&mut ctx, file_id)?;
            ctx.modules.push(module);
        }

        run_pipeline(&mut ctx)
    })();

    (ctx, result)
}

/// The pipeline entry point: for each module, require `type_check_done` on
/// all declarations, then `ir_gen_done` on each function body. Registration
/// of every module happens first so cross-module references resolve.
fn run_pipeline(ctx: &mut CompilationContext) -> CompileResult<()> {
    let modules = ctx.modules.clone();

    for module in &modules {
        driver::require_name_register_self(ctx, *module)?;
    }
    for module in &modules {
        driver::require_name_register_nested(ctx, *module)?;
    }
    for module in &modules {
        driver::require_type_check(ctx, *module)?;
    }
    for module in &modules {
        driver::require_ir_gen(ctx, *module)?;
    }

    Ok(())
}
