//! Swell compiler CLI

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use swell_codegen::runtime;
use swell_error::{Diagnostic, DiagnosticRenderer, SourceCache};
use swell_ir::Program;
use swell_lexer::Lexer;
use swell_parser::parse;

#[derive(Parser)]
#[command(name = "swell")]
#[command(version = "0.1.0")]
#[command(about = "Swell language compiler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compiles a module set and writes the C sources
    Build {
        /// Entry module name (resolved as `<module>.ht`)
        module: String,

        /// Directory scanned for `.ht` sources
        #[arg(short = 'd', long, default_value = ".")]
        module_dir: PathBuf,

        /// Output directory for the generated C
        #[arg(short, long, default_value = "gen")]
        output: PathBuf,
    },

    /// Checks a module set for errors without emitting code
    Check {
        /// Entry module name
        module: String,

        /// Directory scanned for `.ht` sources
        #[arg(short = 'd', long, default_value = ".")]
        module_dir: PathBuf,
    },

    /// Shows file tokens (debug)
    Lex {
        /// Input file
        input: PathBuf,
    },

    /// Shows the file AST (debug)
    Parse {
        /// Input file
        input: PathBuf,
    },

    /// Shows the lowered IR (debug)
    Ir {
        /// Entry module name
        module: String,

        /// Directory scanned for `.ht` sources
        #[arg(short = 'd', long, default_value = ".")]
        module_dir: PathBuf,
    },

    /// Prints the generated C source to stdout
    Emit {
        /// Entry module name
        module: String,

        /// Directory scanned for `.ht` sources
        #[arg(short = 'd', long, default_value = ".")]
        module_dir: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            module,
            module_dir,
            output,
        } => {
            println!("Compiling: {}", module);
            let sources = read_sources(&module_dir);
            let mut cache = SourceCache::new();

            let files = swell_codegen::compile_with_cache(&module, &sources, &mut cache)
                .unwrap_or_else(|diag| fail(&cache, &diag));
            println!("  [ok] Compiled {} module file(s)", sources.len());

            if let Err(err) = fs::create_dir_all(&output) {
                eprintln!("Error creating {}: {}", output.display(), err);
                std::process::exit(1);
            }
            for (name, text) in &files {
                write_file(&output.join(name), text);
            }
            for (name, text) in runtime::support_files() {
                write_file(&output.join(name), text);
            }
            println!("  [ok] Wrote {}/{{{}.h,{}.c}}", output.display(), module, module);
            println!(
                "Next: cc {}/{}.c {}/swell_runtime.c -o {}",
                output.display(),
                module,
                output.display(),
                module
            );
        }

        Commands::Check { module, module_dir } => {
            println!("Checking: {}", module);
            let sources = read_sources(&module_dir);
            let mut cache = SourceCache::new();

            let mut program = Program::load(&module, &sources, &mut cache)
                .unwrap_or_else(|diag| fail(&cache, &diag));
            println!(
                "  [ok] Loader: {} functions, {} structs",
                program.functions.len(),
                program.types.len()
            );

            program
                .lower_all()
                .unwrap_or_else(|diag| fail(&cache, &diag));
            println!("  [ok] Lowering: {} generators", program.generators.len());
        }

        Commands::Lex { input } => {
            let (source, file_id, cache) = read_single(&input);
            let tokens = Lexer::new(&source, file_id)
                .tokenize()
                .unwrap_or_else(|diag| fail(&cache, &diag));
            for token in tokens {
                println!(
                    "{:>4}:{:<3} {:?}",
                    token.span.start.line, token.span.start.column, token.kind
                );
            }
        }

        Commands::Parse { input } => {
            let (source, file_id, cache) = read_single(&input);
            let tokens = Lexer::new(&source, file_id)
                .tokenize()
                .unwrap_or_else(|diag| fail(&cache, &diag));
            let module = parse(tokens).unwrap_or_else(|diag| fail(&cache, &diag));
            println!("{:#?}", module);
        }

        Commands::Ir { module, module_dir } => {
            let sources = read_sources(&module_dir);
            let mut cache = SourceCache::new();
            let mut program = Program::load(&module, &sources, &mut cache)
                .unwrap_or_else(|diag| fail(&cache, &diag));
            program
                .lower_all()
                .unwrap_or_else(|diag| fail(&cache, &diag));

            for gen in &program.generators {
                let native = if gen.is_native { " (native)" } else { "" };
                println!("generator {}{}:", gen.name, native);
                for (guard, stmt) in &gen.conditions {
                    println!("  c{}: {}", guard, stmt);
                }
            }
        }

        Commands::Emit { module, module_dir } => {
            let sources = read_sources(&module_dir);
            let mut cache = SourceCache::new();
            let files = swell_codegen::compile_with_cache(&module, &sources, &mut cache)
                .unwrap_or_else(|diag| fail(&cache, &diag));
            if let Some(text) = files.get(&format!("{}.c", module)) {
                print!("{}", text);
            }
        }
    }
}

/// Reads every `.ht` file in the directory into the loader's source map
fn read_sources(dir: &Path) -> BTreeMap<String, String> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            eprintln!("Error reading {}: {}", dir.display(), err);
            std::process::exit(1);
        }
    };

    let mut sources = BTreeMap::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().map(|e| e == "ht").unwrap_or(false) {
            match fs::read_to_string(&path) {
                Ok(text) => {
                    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                        sources.insert(name.to_string(), text);
                    }
                }
                Err(err) => {
                    eprintln!("Error reading {}: {}", path.display(), err);
                    std::process::exit(1);
                }
            }
        }
    }
    sources
}

fn read_single(input: &Path) -> (String, u32, SourceCache) {
    match fs::read_to_string(input) {
        Ok(source) => {
            let mut cache = SourceCache::new();
            let file_id = cache.add(input.display().to_string(), source.as_str());
            (source, file_id, cache)
        }
        Err(err) => {
            eprintln!("Error reading {}: {}", input.display(), err);
            std::process::exit(1);
        }
    }
}

fn write_file(path: &Path, text: &str) {
    if let Err(err) = fs::write(path, text) {
        eprintln!("Error writing {}: {}", path.display(), err);
        std::process::exit(1);
    }
}

fn fail(cache: &SourceCache, diag: &Diagnostic) -> ! {
    let renderer = DiagnosticRenderer::new(cache);
    eprintln!("{}", renderer.render(diag));
    std::process::exit(1);
}
