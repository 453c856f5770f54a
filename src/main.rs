use clap::Parser;
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use std::io::{Read, Write};
use std::path::PathBuf;

use dessser::backend::rust::RustBackend;
use dessser::backend::{Backend, BackendState};
use dessser::codec::devnull::DevNullSer;
use dessser::codec::rowbinary::{RowBinaryDes, RowBinarySer};
use dessser::codec::sexpr::{self, SExprDes, SExprSer};
use dessser::codec::{Des, Ser};
use dessser::expr::eval::{self, DataPtr, Env, RtVal};
use dessser::expr::{parser as expr_parser, typing};
use dessser::reporting::Message;
use dessser::schema::parser as schema_parser;
use dessser::{desser, GenCtx, Mn};

/// Generates specialised converters between wire formats from a schema
#[derive(Parser)]
#[clap(author, version, about)]
enum Options {
    /// Check a schema and print its normal form
    Schema {
        /// The schema text
        #[clap(name = "SCHEMA")]
        schema: String,
    },
    /// Type-check an IR expression and print its type
    Type {
        /// The expression text
        #[clap(name = "EXPR")]
        expr: String,
    },
    /// Emit converter source code for a pair of formats
    Generate {
        /// The schema text
        #[clap(long)]
        schema: String,
        /// Format to read
        #[clap(long, value_enum)]
        from: InputFormat,
        /// Format to write
        #[clap(long, value_enum)]
        to: OutputFormat,
        /// Base path of the emitted files
        #[clap(long, default_value = "converter")]
        output: String,
        /// Also emit the conventional command-line `main`
        #[clap(long)]
        with_main: bool,
        /// Encode lists terminated instead of count-prefixed
        #[clap(long)]
        no_list_prefix: bool,
        /// Optimisation level passed to the target compiler
        #[clap(long, default_value_t = 2)]
        optim: u8,
    },
    /// Convert one record through the expression interpreter
    Convert {
        /// The schema text
        #[clap(long)]
        schema: String,
        /// Format to read
        #[clap(long, value_enum)]
        from: InputFormat,
        /// Format to write
        #[clap(long, value_enum)]
        to: OutputFormat,
        /// Path to the input, `-` or absent for stdin
        #[clap(long, short = 'i')]
        input: Option<PathBuf>,
        /// One literal input record instead of a file
        #[clap(name = "RECORD")]
        record: Option<String>,
        /// Encode lists terminated instead of count-prefixed
        #[clap(long)]
        no_list_prefix: bool,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, clap::ValueEnum)]
enum InputFormat {
    Sexpr,
    Rowbinary,
}

#[derive(Copy, Clone, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Sexpr,
    Rowbinary,
    Null,
}

fn main() {
    match Options::parse() {
        Options::Schema { schema } => {
            let mn = parse_schema(&schema);
            println!("{}", mn);
        }
        Options::Type { expr } => {
            let parsed = match expr_parser::parse(0, &expr) {
                Ok(parsed) => parsed,
                Err(message) => report(&expr, &message),
            };
            match typing::type_of(&parsed) {
                Ok(r#type) => println!("{}", r#type),
                Err(error) => {
                    eprintln!("type error: {}", error);
                    std::process::exit(1);
                }
            }
        }
        Options::Generate {
            schema,
            from,
            to,
            output,
            with_main,
            no_list_prefix,
            optim,
        } => {
            let mn = parse_schema(&schema);
            let conf = sexpr_conf(no_list_prefix);
            let mut des = make_des(from, conf.clone());
            let mut ser = make_ser(to, conf);
            let mut ctx = GenCtx::new();
            let converter =
                match desser::converter(des.as_mut(), ser.as_mut(), &mn, &mut ctx) {
                    Ok(converter) => converter,
                    Err(error) => {
                        eprintln!("cannot build the converter: {}", error);
                        std::process::exit(1);
                    }
                };

            let mut state = BackendState::new();
            let (_, name) = match state.identifier_of_expression(Some("convert"), converter) {
                Ok(declared) => declared,
                Err(error) => {
                    eprintln!("{}", error);
                    std::process::exit(1);
                }
            };

            let backend = RustBackend {
                decl_file_name: format!("{}_decls.rs", basename(&output)),
                main_entry: with_main.then_some(name),
            };
            let decl_path = format!("{}_decls.{}", output, backend.preferred_decl_extension());
            let def_path = format!("{}.{}", output, backend.preferred_def_extension());
            write_file(&decl_path, |out| backend.print_declarations(&state, out));
            write_file(&def_path, |out| backend.print_definitions(&state, out));
            println!(
                "{}",
                backend.compile_cmd(
                    optim,
                    dessser::backend::Link::Executable,
                    &def_path,
                    &output
                )
            );
        }
        Options::Convert {
            schema,
            from,
            to,
            input,
            record,
            no_list_prefix,
        } => {
            let mn = parse_schema(&schema);
            let conf = sexpr_conf(no_list_prefix);
            let mut des = make_des(from, conf.clone());
            let mut ser = make_ser(to, conf);
            let mut ctx = GenCtx::new();
            let expr = match desser::desser(
                des.as_mut(),
                ser.as_mut(),
                &mn,
                dessser::Expr::ident("src"),
                dessser::Expr::ident("dst"),
                &mut ctx,
            ) {
                Ok(expr) => expr,
                Err(error) => {
                    eprintln!("cannot build the converter: {}", error);
                    std::process::exit(1);
                }
            };

            let single = record.is_some();
            let bytes = read_input(record, input);
            let mut env = Env::new();
            env.bind("src", RtVal::DataPtr(DataPtr::of_bytes(bytes)));
            env.bind("dst", RtVal::DataPtr(DataPtr::of_bytes(Vec::new())));
            let result = match eval::eval(&mut env, &expr) {
                Ok(result) => result,
                Err(error) => {
                    eprintln!("conversion failed: {}", error);
                    std::process::exit(1);
                }
            };
            let (src, dst) = match result
                .into_pair()
                .and_then(|(src, dst)| Ok((src.into_data_ptr()?, dst.into_data_ptr()?)))
            {
                Ok(pointers) => pointers,
                Err(error) => {
                    eprintln!("conversion failed: {}", error);
                    std::process::exit(1);
                }
            };

            let stdout = std::io::stdout();
            let mut stdout = stdout.lock();
            stdout
                .write_all(&dst.bytes())
                .and_then(|_| stdout.write_all(b"\n"))
                .unwrap_or_else(|err| {
                    eprintln!("cannot write output: {}", err);
                    std::process::exit(2);
                });
            drop(stdout);

            if single && src.offset() < src.bytes().len() {
                eprintln!(
                    "{} input bytes left after the record",
                    src.bytes().len() - src.offset()
                );
                std::process::exit(1);
            }
        }
    }
}

fn sexpr_conf(no_list_prefix: bool) -> sexpr::Config {
    sexpr::Config {
        list_prefix_length: !no_list_prefix,
    }
}

fn make_des(from: InputFormat, conf: sexpr::Config) -> Box<dyn Des> {
    match from {
        InputFormat::Sexpr => Box::new(SExprDes::new(conf)),
        InputFormat::Rowbinary => Box::new(RowBinaryDes),
    }
}

fn make_ser(to: OutputFormat, conf: sexpr::Config) -> Box<dyn Ser> {
    match to {
        OutputFormat::Sexpr => Box::new(SExprSer::new(conf)),
        OutputFormat::Rowbinary => Box::new(RowBinarySer),
        OutputFormat::Null => Box::new(DevNullSer),
    }
}

fn parse_schema(source: &str) -> Mn {
    match schema_parser::parse(0, source) {
        Ok(mn) => mn,
        Err(message) => report(source, &message),
    }
}

/// Render a positioned message against its source and exit.
fn report(source: &str, message: &Message) -> ! {
    let mut files = SimpleFiles::new();
    files.add("<input>", source);
    let writer = StandardStream::stderr(ColorChoice::Auto);
    let config = term::Config::default();
    term::emit(
        &mut writer.lock(),
        &config,
        &files,
        &message.to_diagnostic(),
    )
    .expect("cannot render a diagnostic");
    std::process::exit(1)
}

fn read_input(record: Option<String>, input: Option<PathBuf>) -> Vec<u8> {
    match (record, input) {
        (Some(record), _) => record.into_bytes(),
        (None, Some(path)) if path.as_os_str() != "-" => std::fs::read(&path)
            .unwrap_or_else(|err| {
                eprintln!("cannot read {}: {}", path.display(), err);
                std::process::exit(2);
            }),
        _ => {
            let mut bytes = Vec::new();
            std::io::stdin()
                .read_to_end(&mut bytes)
                .unwrap_or_else(|err| {
                    eprintln!("cannot read stdin: {}", err);
                    std::process::exit(2);
                });
            bytes
        }
    }
}

fn write_file(path: &str, print: impl FnOnce(&mut dyn std::fmt::Write) -> std::fmt::Result) {
    let mut out = String::new();
    if print(&mut out).is_err() {
        eprintln!("cannot render {}", path);
        std::process::exit(1);
    }
    std::fs::write(path, out).unwrap_or_else(|err| {
        eprintln!("cannot write {}: {}", path, err);
        std::process::exit(2);
    });
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
