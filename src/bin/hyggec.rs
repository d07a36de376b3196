use clap::{App, Arg, SubCommand};
use codespan::FileId;
use codespan_reporting::{
    diagnostic::{Diagnostic, Label},
    term::{
        termcolor::{ColorChoice, StandardStream},
        Config,
    },
};
use hyggec::{
    ast::UntypedNode,
    codegen::codegen_program,
    error::Error,
    interpreter::{is_value, RuntimeEnv},
    lexer::Lexer,
    sourcemap::Sourcemap,
    typecheck::{typecheck, TypedNode},
};
use std::io::{self, BufReader};
use std::process;

fn main() {
    let matches = App::new("hyggec")
        .about("Compiler for the Hygge language, targeting RISC-V (RARS)")
        .subcommand(
            SubCommand::with_name("tokenise")
                .about("Dump the token stream of a source file")
                .arg(Arg::with_name("FILE").required(true)),
        )
        .subcommand(
            SubCommand::with_name("parse")
                .about("Dump the untyped tree of a source file")
                .arg(Arg::with_name("FILE").required(true)),
        )
        .subcommand(
            SubCommand::with_name("typecheck")
                .about("Type-check a source file and dump the typed tree")
                .arg(Arg::with_name("FILE").required(true)),
        )
        .subcommand(
            SubCommand::with_name("interpret")
                .about("Evaluate a source file with stdin/stdout wired up")
                .arg(Arg::with_name("FILE").required(true)),
        )
        .subcommand(
            SubCommand::with_name("compile")
                .about("Compile a source file to RISC-V assembly")
                .arg(Arg::with_name("FILE").required(true))
                .arg(
                    Arg::with_name("output")
                        .short("o")
                        .long("output")
                        .takes_value(true)
                        .help("Write the assembly to this file instead of stdout"),
                ),
        )
        .get_matches();

    let code = match matches.subcommand() {
        ("tokenise", Some(sub)) => tokenise(sub.value_of("FILE").unwrap()),
        ("parse", Some(sub)) => parse(sub.value_of("FILE").unwrap()),
        ("typecheck", Some(sub)) => typecheck_cmd(sub.value_of("FILE").unwrap()),
        ("interpret", Some(sub)) => interpret(sub.value_of("FILE").unwrap()),
        ("compile", Some(sub)) => {
            compile(sub.value_of("FILE").unwrap(), sub.value_of("output"))
        }
        _ => {
            eprintln!("no subcommand given; try --help");
            1
        }
    };
    process::exit(code);
}

fn emit_diagnostics(sourcemap: &Sourcemap, diagnostics: &[Diagnostic<FileId>]) {
    let mut writer = StandardStream::stderr(ColorChoice::Auto);
    let config = Config::default();
    for diagnostic in diagnostics {
        let _ = codespan_reporting::term::emit(&mut writer, &config, sourcemap.files(), diagnostic);
    }
}

fn load(path: &str) -> Result<(Sourcemap, UntypedNode), i32> {
    let mut sourcemap = Sourcemap::default();
    match sourcemap.add_file_from_disk(path) {
        Err(err) => {
            eprintln!("{}: {}", path, err);
            Err(1)
        }
        Ok((_, Ok(node))) => Ok((sourcemap, node)),
        Ok((_, Err(errors))) => {
            let diagnostics: Vec<Diagnostic<FileId>> = errors.iter().map(|e| e.diagnostic()).collect();
            emit_diagnostics(&sourcemap, &diagnostics);
            Err(1)
        }
    }
}

fn load_typed(path: &str) -> Result<(Sourcemap, TypedNode), i32> {
    let (sourcemap, node) = load(path)?;
    match typecheck(&node) {
        Ok(typed) => Ok((sourcemap, typed)),
        Err(errors) => {
            let diagnostics: Vec<Diagnostic<FileId>> = errors.iter().map(|e| e.diagnostic()).collect();
            emit_diagnostics(&sourcemap, &diagnostics);
            Err(1)
        }
    }
}

fn tokenise(path: &str) -> i32 {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("{}: {}", path, err);
            return 1;
        }
    };
    for result in Lexer::new(&source) {
        match result {
            Ok((start, tok, end)) => println!("{:>5}..{:<5} {}", start, end, tok),
            Err(err) => {
                eprintln!("lexical error at {}: {}", err.index, err.kind);
                return 1;
            }
        }
    }
    0
}

fn parse(path: &str) -> i32 {
    match load(path) {
        Ok((_, node)) => {
            println!("{:#?}", node);
            0
        }
        Err(code) => code,
    }
}

fn typecheck_cmd(path: &str) -> i32 {
    match load_typed(path) {
        Ok((_, typed)) => {
            println!("{:#?}", typed);
            0
        }
        Err(code) => code,
    }
}

fn interpret(path: &str) -> i32 {
    let (sourcemap, typed) = match load_typed(path) {
        Ok(ok) => ok,
        Err(code) => return code,
    };
    let mut env = RuntimeEnv::new(
        Some(Box::new(BufReader::new(io::stdin()))),
        Some(Box::new(io::stdout())),
    );
    let result = env.eval(typed);
    if let Some(code) = env.exit_code {
        return code;
    }
    if is_value(&result) {
        0
    } else {
        let span = result.span;
        let diagnostic = Diagnostic::error()
            .with_message("evaluation got stuck")
            .with_labels(vec![Label::primary(span.file_id, span.span)
                .with_message("this expression cannot be reduced")]);
        emit_diagnostics(&sourcemap, &[diagnostic]);
        1
    }
}

fn compile(path: &str, output: Option<&str>) -> i32 {
    let (_, typed) = match load_typed(path) {
        Ok(ok) => ok,
        Err(code) => return code,
    };
    let asm = codegen_program(&typed);
    match output {
        Some(out_path) => match std::fs::write(out_path, asm.to_string()) {
            Ok(()) => 0,
            Err(err) => {
                eprintln!("{}: {}", out_path, err);
                1
            }
        },
        None => {
            print!("{}", asm);
            0
        }
    }
}
