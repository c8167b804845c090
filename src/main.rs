use std::path::PathBuf;

use clap::{CommandFactory, Parser as ClapParser, error::ErrorKind};

use rill::{
    compile,
    frontend::{print::print_ast, SourceFile, SourceFileOrigin},
    middle::ir::pretty_print::pretty_print_ir,
    CompileOptions,
};

#[derive(Debug, ClapParser)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[arg(short = 'e', value_enum)]
    emit: Option<EmitFormat>,

    /// Built-in version identifiers to enable (windows, linux, macos)
    #[arg(long = "version-id")]
    version_ids: Vec<String>,

    source_files: Vec<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum EmitFormat {
    #[value(name = "ast")]
    Ast,
    #[value(name = "ir")]
    Ir,
}

fn main() {
    let args = Args::parse();

    if args.source_files.is_empty() {
        Args::command()
            .error(ErrorKind::MissingRequiredArgument, "Missing source files!")
            .exit();
    }

    for source_file in &args.source_files {
        if !source_file.is_file() {
            Args::command()
                .error(
                    ErrorKind::InvalidValue,
                    format!("Input path '{}' is not a file!", source_file.display()),
                )
                .exit()
        }
    }

    /* Read in source files */

    let sources = args
        .source_files
        .iter()
        .map(|path| {
            let contents = match std::fs::read_to_string(path) {
                Ok(contents) => contents,
                Err(error) => Args::command()
                    .error(
                        ErrorKind::Io,
                        format!("Failed to read '{}': {error}", path.display()),
                    )
                    .exit(),
            };

            SourceFile {
                contents,
                origin: SourceFileOrigin::File(path.clone()),
            }
        })
        .collect::<Vec<_>>();

    let mut options = CompileOptions::default();
    for version in &args.version_ids {
        options = options.with_version(version);
    }

    let (ctx, result) = compile(sources, options);

    match args.emit {
        Some(EmitFormat::Ast) => {
            for module in &ctx.modules {
                print!("{}", print_ast(&ctx, *module));
            }
        }
        Some(EmitFormat::Ir) => {
            for func in ctx.ir.functions.iter() {
                print!("{}", pretty_print_ir(&ctx, func));
            }
        }
        None => {}
    }

    if result.is_err() || ctx.has_errors() {
        eprintln!(
            "compilation failed with {} error(s)",
            ctx.diagnostics.len()
        );
        std::process::exit(1);
    }
}
