//! End-to-end pipeline scenarios: source text in, diagnostics and SSA IR out.

use rill::{
    compile,
    context::CompilationContext,
    diag::DiagKind,
    frontend::{ast::AstKind, SourceFile},
    middle::{
        eval,
        ir::{ExternKind, IrFunction, IrIndex, IrKind, IrOpcode},
    },
    CompileOptions,
};

fn compile_sources(sources: &[&str], options: CompileOptions) -> (CompilationContext, bool) {
    let sources = sources
        .iter()
        .map(|source| SourceFile::in_memory(*source))
        .collect();
    let (ctx, result) = compile(sources, options);
    (ctx, result.is_ok())
}

fn compile_clean(sources: &[&str], options: CompileOptions) -> CompilationContext {
    let (ctx, ok) = compile_sources(sources, options);
    assert!(ok, "compilation aborted fatally");
    assert!(
        !ctx.has_errors(),
        "unexpected diagnostics: {:?}",
        ctx.diagnostics
    );
    ctx
}

fn function_named<'ctx>(ctx: &'ctx CompilationContext, name: &str) -> &'ctx IrFunction {
    ctx.ir
        .functions
        .iter()
        .find(|func| ctx.idents.get(func.name) == name)
        .unwrap_or_else(|| panic!("no IR function named {name}"))
}

/// Every (opcode, args) pair in every generated function
fn all_instructions(ctx: &CompilationContext) -> Vec<(IrOpcode, Vec<IrIndex>)> {
    let mut result = Vec::new();
    for func in ctx.ir.functions.iter() {
        for instr in func.instructions.indices() {
            result.push((
                func.instructions[instr].op,
                func.instr_args(instr).to_vec(),
            ));
        }
    }
    result
}

/* ───── hello world, two versions ───── */

const HELLO_WORLD: &str = r#"
module main;

#version(windows)
{
    @extern(module, "kernel32")
    void ExitProcess(u32 code);

    void main() { ExitProcess(42); }
}
else
{
    @extern(syscall, 60)
    void exit(i32 code);

    void main() { exit(42); }
}
"#;

#[test]
fn hello_world_windows_uses_the_external_module() {
    let options = CompileOptions::default().with_version("windows");
    let ctx = compile_clean(&[HELLO_WORLD], options);

    // Exactly one external module reference, to kernel32
    let modules: Vec<_> = ctx
        .ir
        .function_externs
        .iter()
        .filter_map(|kind| match kind {
            ExternKind::Module(library) => Some(ctx.idents.get(*library)),
            _ => None,
        })
        .collect();
    assert_eq!(modules, vec!["kernel32"]);

    // No syscall instruction anywhere
    assert!(all_instructions(&ctx)
        .iter()
        .all(|(op, _)| *op != IrOpcode::Syscall));

    // main calls ExitProcess through its function handle
    let exit_process = function_named(&ctx, "ExitProcess");
    let main = function_named(&ctx, "main");
    let called: Vec<_> = main
        .instructions
        .indices()
        .filter(|i| main.instructions[*i].op == IrOpcode::Call)
        .map(|i| main.instr_arg(i, 0))
        .collect();
    assert_eq!(called.len(), 1);
    assert_eq!(called[0].kind(), IrKind::Function);
    assert_eq!(
        ctx.ir.functions[called[0].as_function()].name,
        exit_process.name
    );
}

#[test]
fn hello_world_linux_uses_one_syscall_with_immediate_60() {
    let options = CompileOptions::default().with_version("linux");
    let ctx = compile_clean(&[HELLO_WORLD], options);

    // No external module reference
    assert!(ctx
        .ir
        .function_externs
        .iter()
        .all(|kind| !matches!(kind, ExternKind::Module(_))));

    let syscalls: Vec<_> = all_instructions(&ctx)
        .into_iter()
        .filter(|(op, _)| *op == IrOpcode::Syscall)
        .collect();
    assert_eq!(syscalls.len(), 1);
    assert_eq!(ctx.ir.constant_value(syscalls[0].1[0]), 60);
}

/* ───── forward alias chain ───── */

#[test]
fn forward_alias_chain_folds_to_the_basic_type() {
    let ctx = compile_clean(
        &["module m;\nalias A = B;\nalias B = i32;\nA x = 3;\n"],
        CompileOptions::default(),
    );

    // One global of IR type i32 initialized to 3; the aliases leave no trace
    assert_eq!(ctx.ir.globals.len(), 1);
    assert_eq!(ctx.ir.functions.len(), 0);

    let global = ctx.ir.globals.iter().next().unwrap();
    assert_eq!(
        global.ty,
        rill::middle::ir::IrType::basic(rill::frontend::ast::BasicTypeKind::I32)
    );
    assert_eq!(&global.data[..4], &3i32.to_le_bytes());
}

#[test]
fn alias_cycle_reports_exactly_one_cycle_error() {
    let (ctx, ok) = compile_sources(
        &["module m;\nalias X = Y;\nalias Y = X;\nX v = 1;\n"],
        CompileOptions::default(),
    );

    assert!(!ok, "a circular dependency must abort the invocation");
    let cycles = ctx
        .diagnostics
        .iter()
        .filter(|d| matches!(d.kind, DiagKind::CircularDependency(_)))
        .count();
    assert_eq!(cycles, 1);
}

/* ───── SSA of a diamond ───── */

#[test]
fn diamond_control_flow_merges_through_one_phi() {
    let ctx = compile_clean(
        &["module m;\n\
           i32 f(i32 c) {\n\
               i32 x = 1;\n\
               if (c > 0) x = 2; else x = 3;\n\
               return x;\n\
           }\n"],
        CompileOptions::default(),
    );

    let f = function_named(&ctx, "f");

    // entry -> {then, else} -> merge -> exit
    assert_eq!(f.blocks.len(), 5);

    // Exactly one block carries a phi: the merge block, with one operand
    // per predecessor in predecessor order
    let phi_blocks: Vec<_> = f
        .blocks
        .indices()
        .map(IrIndex::block)
        .filter(|b| !f.block_phis(*b).is_empty())
        .collect();
    assert_eq!(phi_blocks.len(), 1);

    let merge = phi_blocks[0];
    assert_eq!(f.block(merge).predecessors.len, 2);

    let phis = f.block_phis(merge);
    assert_eq!(phis.len(), 1);

    let phi = &f.phis[phis[0]];
    assert_eq!(phi.args.len, 2);
    let args: Vec<i64> = f
        .arrays
        .handles(phi.args)
        .map(|arg| ctx.ir.constant_value(arg))
        .collect();
    assert_eq!(args, vec![2, 3]);

    // The initial x = 1 is dead: nothing in the function references it
    for instr in f.instructions.indices() {
        for arg in f.instr_args(instr) {
            if arg.kind() == IrKind::ConstantSmall {
                assert_ne!(arg.small_constant_value(), 1);
            }
        }
    }
}

/* ───── trivial-phi elimination around a loop ───── */

#[test]
fn loop_invariant_variable_needs_no_phi() {
    let ctx = compile_clean(
        &["module m;\n\
           i32 g(i32 n) {\n\
               i32 y = 7;\n\
               i32 i = 0;\n\
               while (i < n) { i = i + 1; }\n\
               return y;\n\
           }\n"],
        CompileOptions::default(),
    );

    let g = function_named(&ctx, "g");

    // After construction no phi merges y: only the loop counter gets one
    let mut phi_count = 0;
    for block in g.blocks.indices().map(IrIndex::block) {
        phi_count += g.block_phis(block).len();
    }
    assert_eq!(phi_count, 1, "only the loop counter needs a phi");

    // The return value resolves directly to the pre-loop definition
    let exit = IrIndex::block(IrFunction::EXIT);
    assert!(g.block_phis(exit).is_empty());
    let ret_instrs = g.block_instrs(exit);
    let ret = ret_instrs
        .iter()
        .find(|i| g.instructions[**i].op == IrOpcode::RetVal)
        .expect("exit must return a value");
    assert_eq!(ctx.ir.constant_value(g.instr_arg(*ret, 0)), 7);

    // No removed registers survive finalize
    for vreg in g.virt_regs.iter() {
        assert!(!vreg.is_removed());
    }
}

/* ───── static foreach ───── */

#[test]
fn static_foreach_declares_one_member_per_element() {
    let mut ctx = compile_clean(
        &[
            "module lib;\nvoid fa() {}\nvoid fb() {}\nvoid fc() {}\n",
            "module m;\n\
             import lib;\n\
             alias handlers = [fa, fb, fc];\n\
             #foreach(i, v; handlers) {\n\
                 enum u64 v = i;\n\
             }\n",
        ],
        CompileOptions::default(),
    );

    let m_id = ctx.idents.get_or_intern("m");
    let module = *ctx
        .packages
        .get(&vec![m_id].into_boxed_slice())
        .expect("module m is registered");
    let scope = match &ctx.ast.node(module).kind {
        AstKind::Module { scope, .. } => *scope,
        _ => unreachable!(),
    };

    for (name, expected) in [("fa", 0), ("fb", 1), ("fc", 2)] {
        let ident = ctx.idents.get_or_intern(name);
        let member = *ctx
            .scopes
            .get(scope)
            .entities
            .get(&ident)
            .unwrap_or_else(|| panic!("expanded member {name} missing"));

        assert!(matches!(
            ctx.ast.node(member).kind,
            AstKind::EnumMember { .. }
        ));

        let value = match &ctx.ast.node(member).kind {
            AstKind::EnumMember { value, .. } => *value,
            _ => unreachable!(),
        };
        let evaluated = eval::eval_static_expr(&mut ctx, value).expect("member is constant");
        assert_eq!(evaluated.as_int(), expected);
    }
}

/* ───── static conditional expansion preserves order ───── */

#[test]
fn expansion_preserves_source_order() {
    let ctx = compile_clean(
        &["module m;\n\
           enum u32 a1 = 1;\n\
           #if (true) { enum u32 a2 = 2; }\n\
           enum u32 a3 = 3;\n\
           #version(linux) { enum u32 a4 = 4; } else { enum u32 a5 = 5; }\n"],
        CompileOptions::default().with_version("linux"),
    );

    let module = ctx.modules[0];
    let decls = match &ctx.ast.node(module).kind {
        AstKind::Module { decls, .. } => *decls,
        _ => unreachable!(),
    };

    let names: Vec<&str> = ctx
        .ast
        .list(decls)
        .iter()
        .filter_map(|decl| match &ctx.ast.node(*decl).kind {
            AstKind::EnumMember { name, .. } => Some(ctx.idents.get(*name)),
            _ => None,
        })
        .collect();

    assert_eq!(names, vec!["a1", "a2", "a3", "a4"]);
}

#[test]
fn unknown_version_identifiers_are_rejected() {
    let (ctx, ok) = compile_sources(
        &["module m;\n#version(solaris) { enum u32 x = 1; }\n"],
        CompileOptions::default(),
    );

    assert!(ok);
    assert!(ctx
        .diagnostics
        .iter()
        .any(|d| matches!(d.kind, DiagKind::UnknownVersion(_))));
}

#[test]
fn failed_static_assert_interpolates_its_message() {
    let (ctx, ok) = compile_sources(
        &["module m;\n#assert(1 == 2, \"sizes disagree\");\n"],
        CompileOptions::default(),
    );

    assert!(ok, "a failed assert is recoverable");
    assert!(ctx.diagnostics.iter().any(|d| matches!(
        &d.kind,
        DiagKind::StaticAssertFailed(message) if message.contains("sizes disagree")
    )));
}

/* ───── module/package conflict ───── */

#[test]
fn module_conflict_cites_both_files() {
    let (ctx, ok) = compile_sources(
        &[
            "module a.b;\nenum u32 one = 1;\n",
            "module a.b;\nenum u32 two = 2;\n",
        ],
        CompileOptions::default(),
    );

    assert!(ok);
    let conflicts: Vec<_> = ctx
        .diagnostics
        .iter()
        .filter(|d| matches!(d.kind, DiagKind::ModuleConflict { .. }))
        .collect();
    assert_eq!(conflicts.len(), 1);

    // The package path maps to exactly one of the two modules
    assert_eq!(ctx.packages.len(), 1);
}

/* ───── structs, implicit this, methods ───── */

#[test]
fn struct_members_and_methods_compile() {
    let ctx = compile_clean(
        &["module m;\n\
           struct Point {\n\
               i32 x;\n\
               i32 y;\n\
               i32 sum() { return x + y; }\n\
           }\n\
           i32 use_point() {\n\
               Point p;\n\
               p.x = 1;\n\
               p.y = 2;\n\
               return p.sum();\n\
           }\n"],
        CompileOptions::default(),
    );

    let sum = function_named(&ctx, "sum");
    let use_point = function_named(&ctx, "use_point");

    // The method's implicit this parameter materializes as its first Param
    let params: Vec<_> = sum
        .instructions
        .indices()
        .filter(|i| sum.instructions[*i].op == IrOpcode::Param)
        .collect();
    assert_eq!(params.len(), 1);

    // The caller stores into the fields and calls the method
    let stores = use_point
        .instructions
        .indices()
        .filter(|i| use_point.instructions[*i].op == IrOpcode::Store)
        .count();
    assert!(stores >= 2);

    let calls = use_point
        .instructions
        .indices()
        .filter(|i| use_point.instructions[*i].op == IrOpcode::Call)
        .count();
    assert_eq!(calls, 1);
}

/* ───── strings ───── */

#[test]
fn string_literals_become_zero_terminated_globals_with_a_slice() {
    let ctx = compile_clean(
        &["module m;\n\
           void f(u8[] message) {}\n\
           void main() { f(\"hi\"); }\n"],
        CompileOptions::default(),
    );

    // One read-only, zero-terminated global holding the bytes plus NUL
    let global = ctx
        .ir
        .globals
        .iter()
        .find(|g| {
            g.flags
                .contains(rill::middle::ir::GlobalFlags::READ_ONLY)
        })
        .expect("string literal global missing");
    assert_eq!(global.data, b"hi\0");

    // The call passes the `{length, ptr}` aggregate by pointer
    let aggregate = ctx.ir.aggregates.iter().next().expect("slice aggregate");
    assert_eq!(aggregate.members.len(), 2);
    assert_eq!(ctx.ir.constant_value(aggregate.members[0]), 2);
    assert_eq!(aggregate.members[1].kind(), IrKind::Global);
}

/* ───── lifecycle and idempotence ───── */

#[test]
fn require_calls_are_idempotent() {
    let mut ctx = compile_clean(
        &["module m;\ni32 twice(i32 v) { return v + v; }\n"],
        CompileOptions::default(),
    );

    let functions_before = ctx.ir.functions.len();
    let module = ctx.modules[0];

    // Driving the pipeline again must not re-run anything
    rill::middle::driver::require_type_check(&mut ctx, module).unwrap();
    rill::middle::driver::require_ir_gen(&mut ctx, module).unwrap();

    assert_eq!(ctx.ir.functions.len(), functions_before);
    assert!(!ctx.has_errors());
}

/* ───── printing round trip ───── */

#[test]
fn printed_ast_reparses_to_the_same_print() {
    let source = "module m;\n\
                  enum u32 limit = 4;\n\
                  i32 f(i32 c) {\n\
                      i32 x = 1;\n\
                      if (c > 0) x = 2; else x = 3;\n\
                      while (x < c) x = x + 1;\n\
                      return x;\n\
                  }\n";

    let mut ctx1 = CompilationContext::new(0);
    let (file1, _) = ctx1.add_file(SourceFile::in_memory(source));
    let module1 = rill::frontend::parser::parse_file(&mut ctx1, file1).unwrap();
    let print1 = rill::frontend::print::print_ast(&ctx1, module1);

    let mut ctx2 = CompilationContext::new(0);
    let (file2, _) = ctx2.add_file(SourceFile::in_memory(&print1));
    let module2 = rill::frontend::parser::parse_file(&mut ctx2, file2).unwrap();
    let print2 = rill::frontend::print::print_ast(&ctx2, module2);

    assert_eq!(print1, print2);
}

/* ───── type errors ───── */

#[test]
fn type_errors_are_reported_and_recoverable() {
    let (ctx, ok) = compile_sources(
        &["module m;\n\
           void f() {\n\
               bool b = true;\n\
               i32 x = b;\n\
           }\n"],
        CompileOptions::default(),
    );

    assert!(ok);
    assert!(ctx
        .diagnostics
        .iter()
        .any(|d| matches!(d.kind, DiagKind::TypeMismatch { .. })));
}

#[test]
fn assigning_to_a_non_lvalue_is_rejected() {
    let (ctx, ok) = compile_sources(
        &["module m;\nvoid f() { 1 = 2; }\n"],
        CompileOptions::default(),
    );

    assert!(ok);
    assert!(ctx
        .diagnostics
        .iter()
        .any(|d| matches!(d.kind, DiagKind::LvalueRequired)));
}

#[test]
fn wrong_argument_count_is_rejected() {
    let (ctx, ok) = compile_sources(
        &["module m;\nvoid f(i32 a) {}\nvoid g() { f(1, 2); }\n"],
        CompileOptions::default(),
    );

    assert!(ok);
    assert!(ctx
        .diagnostics
        .iter()
        .any(|d| matches!(d.kind, DiagKind::ArgumentCountMismatch { .. })));
}

#[test]
fn missing_argument_without_default_is_rejected() {
    let (ctx, ok) = compile_sources(
        &["module m;\nvoid f(i32 a, i32 b = 4) {}\nvoid g() { f(); }\n"],
        CompileOptions::default(),
    );

    assert!(ok);
    assert!(ctx
        .diagnostics
        .iter()
        .any(|d| matches!(d.kind, DiagKind::MissingDefaultArgument(0))));
}

#[test]
fn a_type_used_as_a_value_is_rejected() {
    let (ctx, ok) = compile_sources(
        &["module m;\nalias T = i32;\nvoid f() { i32 y = T; }\n"],
        CompileOptions::default(),
    );

    assert!(ok);
    // The alias folds to the type entity itself; its value has the metatype
    // and must not coerce into a concrete type silently
    assert!(ctx
        .diagnostics
        .iter()
        .any(|d| matches!(d.kind, DiagKind::TypeMismatch { .. })));
}

#[test]
fn foreach_requires_an_alias_array() {
    let (ctx, ok) = compile_sources(
        &["module m;\nvoid fa() {}\n#foreach(i, v; [fa]) { enum u64 v = i; }\n"],
        CompileOptions::default(),
    );

    assert!(ok);
    // A bare array literal is not an alias array
    assert!(ctx
        .diagnostics
        .iter()
        .any(|d| matches!(d.kind, DiagKind::NonIterableForeach)));
}

#[test]
fn undefined_identifiers_do_not_cascade() {
    let (ctx, ok) = compile_sources(
        &["module m;\nvoid f() { i32 x = missing + 1; i32 y = x; }\n"],
        CompileOptions::default(),
    );

    assert!(ok);
    let undefined = ctx
        .diagnostics
        .iter()
        .filter(|d| matches!(d.kind, DiagKind::UndefinedIdentifier(_)))
        .count();
    assert_eq!(undefined, 1, "the error node must stop the cascade");
}
