use std::{env, fs, io, path::Path};

use stackasm::analysis::solver::SolverConfig;
use stackasm::bytecode::AssembleOptions;
use stackasm::bytecode::disasm::{blocks_to_string, print_unit};
use stackasm::frontend::lexer::Lexer;
use stackasm::frontend::parser::Parser;
use stackasm::frontend::token_dumper::TokenDumper;
use tracing_subscriber::EnvFilter;

/// Flags that consume the following argument.
const VALUE_FLAGS: &[&str] = &["--depth", "--max-rounds", "--emit"];

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    let tokens_only = args.contains(&"--tokens".to_string());
    let no_color = args.contains(&"--no-color".to_string());
    let pretty = args.contains(&"--pretty".to_string());
    let blocks = args.contains(&"--blocks".to_string());
    let verbose = args.iter().any(|a| a == "--verbose" || a == "-v");

    init_tracing(&log_filter(verbose, env::var("RUST_LOG").ok()));

    let depth = flag_value(&args, "--depth").map(|v| parse_number::<u32>("--depth", v));
    let max_rounds = flag_value(&args, "--max-rounds")
        .map(|v| parse_number::<usize>("--max-rounds", v));
    let emit = flag_value(&args, "--emit");

    // first non-flag argument that is not a flag's value is the filename
    let filename = args
        .iter()
        .enumerate()
        .skip(1)
        .find(|(i, a)| !a.starts_with('-') && !VALUE_FLAGS.contains(&args[i - 1].as_str()))
        .map(|(_, a)| a);

    let Some(filename) = filename else {
        print_usage();
        std::process::exit(1);
    };

    ensure_extension(filename);
    let source = match fs::read_to_string(filename) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("Failed to read '{}': {}", filename, e);
            std::process::exit(1);
        }
    };

    if tokens_only {
        dump_tokens(&source, no_color, pretty);
        return;
    }

    let mut options = AssembleOptions {
        stack_depth: depth,
        ..AssembleOptions::default()
    };
    if let Some(max_rounds) = max_rounds {
        options.solver = SolverConfig { max_rounds };
    }

    let name = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("<module>");
    assemble_file(&source, name, &options, blocks, emit);
}

/// Filter directives for the stderr subscriber. `RUST_LOG` wins when set.
fn log_filter(verbose: bool, from_env: Option<String>) -> String {
    match from_env {
        Some(directives) if !directives.trim().is_empty() => directives,
        _ if verbose => "stackasm=debug".to_string(),
        _ => "stackasm=warn".to_string(),
    }
}

fn init_tracing(directives: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(directives))
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let pos = args.iter().position(|a| a == flag)?;
    match args.get(pos + 1) {
        Some(value) => Some(value.as_str()),
        None => {
            eprintln!("Error: {} expects a value", flag);
            std::process::exit(1);
        }
    }
}

fn parse_number<T: std::str::FromStr>(flag: &str, value: &str) -> T {
    match value.parse() {
        Ok(n) => n,
        Err(_) => {
            eprintln!("Error: {} expects a non-negative integer, got '{}'", flag, value);
            std::process::exit(1);
        }
    }
}

fn ensure_extension(filename: &str) {
    let path = Path::new(filename);
    if path.extension().and_then(|e| e.to_str()) != Some("sasm") {
        eprintln!("Error: expected a .sasm file, got {}", filename);
        std::process::exit(1);
    }
}

fn dump_tokens(source: &str, no_color: bool, pretty: bool) {
    let mut lexer = Lexer::new(source);

    match lexer.tokenize() {
        Ok(tokens) => {
            let mut dumper = TokenDumper::new();

            if no_color {
                dumper = dumper.no_color();
            }
            if pretty {
                dumper = dumper.pretty();
            }

            dumper.dump(&tokens);
        }
        Err(e) => {
            eprintln!("Lexer error: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!("STACKASM - wordcode assembler with stack-depth analysis");
    println!();
    println!("Usage:");
    println!("  stackasm <file.sasm>                  Assemble and print the listing");
    println!("  stackasm --tokens <file.sasm>         Show tokens only (--pretty, --no-color)");
    println!("  stackasm --blocks <file.sasm>         Also list solved blocks and exit states");
    println!("  stackasm --depth N <file.sasm>        Use N as stack depth, skip the analysis");
    println!("  stackasm --max-rounds N <file.sasm>   Solver round budget (default 1000)");
    println!("  stackasm --emit out.bin <file.sasm>   Write the code unit in binary form");
    println!("  stackasm --verbose, -v <file.sasm>    Log encoder and solver steps to stderr");
    println!("  stackasm --help, -h                   Show this help");
}

fn assemble_file(
    source: &str,
    name: &str,
    options: &AssembleOptions,
    blocks: bool,
    emit: Option<&str>,
) {
    let mut lexer = Lexer::new(source);
    let tokens = match lexer.tokenize() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("Lexer error: {}", e);
            std::process::exit(1);
        }
    };

    let mut parser = Parser::new(tokens);
    let builder = match parser.parse() {
        Ok(b) => b,
        Err(e) => {
            eprintln!("Parse error: {}", e);
            std::process::exit(1);
        }
    };

    let assembly = match builder.assemble(name, options) {
        Ok(assembly) => assembly,
        Err(e) if e.is_internal() => {
            eprintln!("Internal assembler error: {}", e);
            std::process::exit(1);
        }
        Err(e) => {
            eprintln!("Assembly error: {}", e);
            std::process::exit(1);
        }
    };

    print_unit(&assembly.unit);

    if blocks {
        match &assembly.graph {
            Some(graph) => print!("{}", blocks_to_string(graph)),
            None => println!("(analysis skipped: depth supplied with --depth)"),
        }
        if let Some(stats) = &assembly.stats {
            println!("solved in {} round(s)", stats.rounds);
        }
    }

    println!("stack depth: {}", assembly.unit.stack_depth);

    if let Some(path) = emit {
        let bytes = match assembly.unit.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                eprintln!("Serialization error: {}", e);
                std::process::exit(1);
            }
        };
        if let Err(e) = fs::write(path, bytes) {
            eprintln!("Failed to write '{}': {}", path, e);
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_filter_defaults_to_warnings() {
        assert_eq!(log_filter(false, None), "stackasm=warn");
    }

    #[test]
    fn test_log_filter_verbose() {
        assert_eq!(log_filter(true, None), "stackasm=debug");
        assert_eq!(log_filter(true, Some("  ".to_string())), "stackasm=debug");
    }

    #[test]
    fn test_log_filter_env_wins() {
        let env = Some("stackasm::analysis=trace".to_string());
        assert_eq!(log_filter(true, env.clone()), "stackasm::analysis=trace");
        assert_eq!(log_filter(false, env), "stackasm::analysis=trace");
    }

    #[test]
    fn test_log_filter_parses() {
        for directives in [log_filter(false, None), log_filter(true, None)] {
            assert!(EnvFilter::try_new(&directives).is_ok(), "{}", directives);
        }
    }
}
