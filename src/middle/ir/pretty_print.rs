//! Debug dump of a function's IR: blocks in layout order with their phis,
//! instructions and CFG edges.

use crate::{
    context::CompilationContext,
    middle::ir::{IrFunction, IrIndex, IrKind, InstrFlags},
};

pub fn pretty_print_ir(ctx: &CompilationContext, func: &IrFunction) -> String {
    let mut out = String::new();
    let name = ctx.idents.get(func.name);
    out.push_str(&format!("fn {name}:\n"));

    // Extern declarations carry no body
    if func.blocks.is_empty() {
        return out;
    }

    let mut block = IrIndex::block(IrFunction::ENTRY);
    while block.is_defined() {
        let bb = func.block(block);

        let preds: Vec<String> = func
            .arrays
            .handles(bb.predecessors)
            .map(|p| format!("@{}", p.payload()))
            .collect();
        out.push_str(&format!(
            "  @{}: preds({})\n",
            block.payload(),
            preds.join(", ")
        ));

        for phi in func.block_phis(block) {
            let data = &func.phis[phi];
            let args: Vec<String> = func
                .arrays
                .handles(data.args)
                .map(|a| format_value(ctx, func, a))
                .collect();
            out.push_str(&format!(
                "    {} = phi {}\n",
                format_value(ctx, func, data.result),
                args.join(", ")
            ));
        }

        for instr in func.block_instrs(block) {
            let header = &func.instructions[instr];
            let args: Vec<String> = func
                .instr_args(instr)
                .iter()
                .map(|a| format_value(ctx, func, *a))
                .collect();

            let mnemonic = format!("{:?}", header.op).to_lowercase();
            match func.instr_result(instr) {
                Some(result) => out.push_str(&format!(
                    "    {} = {} {}\n",
                    format_value(ctx, func, result),
                    mnemonic,
                    args.join(", ")
                )),
                None if header.flags.contains(InstrFlags::HAS_RESULT) => unreachable!(),
                None => {
                    let succs: Vec<String> = func
                        .arrays
                        .handles(bb.successors)
                        .map(|s| format!("@{}", s.payload()))
                        .collect();
                    if succs.is_empty() {
                        out.push_str(&format!("    {} {}\n", mnemonic, args.join(", ")));
                    } else {
                        out.push_str(&format!(
                            "    {} {} -> {}\n",
                            mnemonic,
                            args.join(", "),
                            succs.join(", ")
                        ));
                    }
                }
            }
        }

        block = bb.next_block;
    }

    out
}

fn format_value(ctx: &CompilationContext, _func: &IrFunction, value: IrIndex) -> String {
    match value.kind() {
        IrKind::ConstantSmall => value.small_constant_value().to_string(),
        IrKind::Constant => ctx.ir.constant_value(value).to_string(),
        IrKind::ConstantZero => "0".to_string(),
        IrKind::Function => {
            let func = &ctx.ir.functions[value.as_function()];
            format!("@{}", ctx.idents.get(func.name))
        }
        IrKind::Global => format!("g{}", value.payload()),
        _ => format!("{value:?}"),
    }
}
