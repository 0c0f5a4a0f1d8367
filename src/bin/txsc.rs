use std::env;
use std::fs;

use tracing_subscriber::EnvFilter;

use txsc_lang::ast::parse_script_ast;
use txsc_lang::compiler::{compile, CompileOptions, ImplicitPushes, Target};
use txsc_lang::emitter;

fn main() {
    if let Err(err) = run() {
        eprintln!("{err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    if args.is_empty() {
        return Err(
            "usage: txsc <src.txs> [--target asm|hex] [--no-opt] [--implicit-pushes allow|warn|deny] [--from-asm] [--dump-ast] [-o dst] [-v|-vv|-vvv]"
                .to_string(),
        );
    }

    let mut src: Option<String> = None;
    let mut options = CompileOptions::default();
    let mut out_path: Option<String> = None;
    let mut dump_ast = false;
    let mut from_asm = false;

    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--target" => {
                let value = args.get(i + 1).ok_or_else(|| "--target requires asm or hex".to_string())?;
                options.target = Target::from_name(value).ok_or_else(|| format!("unknown target: {value}"))?;
                i += 2;
            }
            "--implicit-pushes" => {
                let value = args.get(i + 1).ok_or_else(|| "--implicit-pushes requires a policy".to_string())?;
                options.implicit_pushes =
                    ImplicitPushes::from_name(value).ok_or_else(|| format!("unknown implicit-push policy: {value}"))?;
                i += 2;
            }
            "--no-opt" => {
                options.optimize = false;
                i += 1;
            }
            "--from-asm" => {
                from_asm = true;
                i += 1;
            }
            "--dump-ast" => {
                dump_ast = true;
                i += 1;
            }
            "-o" => {
                let value = args.get(i + 1).ok_or_else(|| "-o requires a path".to_string())?;
                out_path = Some(value.clone());
                i += 2;
            }
            "-v" | "-vv" | "-vvv" => {
                options.verbosity = (args[i].len() - 1) as u8;
                i += 1;
            }
            value if value.starts_with('-') => {
                return Err(format!("unknown option: {value}"));
            }
            value => {
                if src.is_some() {
                    return Err("only one source file is supported".to_string());
                }
                src = Some(value.to_string());
                i += 1;
            }
        }
    }

    init_tracing(options.verbosity);

    let src = src.ok_or_else(|| "missing source file".to_string())?;
    let source = fs::read_to_string(&src).map_err(|err| format!("failed to read {src}: {err}"))?;

    if dump_ast {
        let ast = parse_script_ast(&source).map_err(|err| format!("{err}"))?;
        return write_output(out_path.as_deref(), &ast.to_string());
    }

    let rendered = if from_asm {
        // Re-emit existing script assembly in the requested dialect.
        let ops = emitter::parse_asm(&source).map_err(|err| format!("{err}"))?;
        match options.target {
            Target::Asm => emitter::emit_asm(&ops),
            Target::Hex => emitter::emit_hex(&ops),
        }
    } else {
        let compiled = compile(&source, &options).map_err(|err| format!("compile error: {err}"))?;
        for warning in &compiled.warnings {
            eprintln!("warning: {warning}");
        }
        compiled.output(options.target)
    };

    write_output(out_path.as_deref(), &rendered)
}

fn write_output(out_path: Option<&str>, rendered: &str) -> Result<(), String> {
    match out_path {
        Some(path) => fs::write(path, rendered).map_err(|err| format!("failed to write {path}: {err}")),
        None => {
            println!("{rendered}");
            Ok(())
        }
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init();
}
