//! Command-line interface for xmlguard

#[cfg(feature = "cli")]
use clap::{Parser, Subcommand};

#[cfg(feature = "cli")]
use std::fs;
#[cfg(feature = "cli")]
use std::path::PathBuf;
#[cfg(feature = "cli")]
use std::sync::Arc;

#[cfg(feature = "cli")]
use xmlguard::catalog::XmlCatalog;
#[cfg(feature = "cli")]
use xmlguard::{
    Diagnostic, Encoding, EscapePolicy, GrammarCache, ParseOptions, ResolutionPolicy, SerializeOptions, Serializer,
    Severity, ValidatingParser,
};

#[cfg(feature = "cli")]
#[derive(Parser, Debug)]
#[command(name = "xmlguard")]
#[command(author, version, about = "Safe, schema-aware XML parsing and serialization", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Where external entities may be read from
#[cfg(feature = "cli")]
#[derive(clap::Args, Debug)]
struct PolicyArgs {
    /// Allow external resources below this directory
    #[arg(long, value_name = "DIR", conflicts_with_all = ["allow", "catalog"])]
    allow_local: Option<PathBuf>,

    /// Allow this exact system identifier (repeatable)
    #[arg(long, value_name = "URI", conflicts_with = "catalog")]
    allow: Vec<String>,

    /// Resolve through an OASIS XML catalog
    #[arg(long, value_name = "FILE")]
    catalog: Option<PathBuf>,
}

#[cfg(feature = "cli")]
#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse (and validate) an XML document, reporting diagnostics
    Parse {
        /// Path to the XML file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// XSD schema to load into the grammar cache (repeatable)
        #[arg(short, long, value_name = "SCHEMA")]
        schema: Vec<PathBuf>,

        /// Do not validate against schemas
        #[arg(long)]
        no_validate: bool,

        /// Only fatal problems fail the parse
        #[arg(long)]
        lenient: bool,

        /// Severity of denied external entities: warning, error or fatal
        #[arg(long, value_name = "LEVEL", default_value = "error", value_parser = parse_severity)]
        entity_severity: Severity,

        /// Severity of schema violations: warning, error or fatal
        #[arg(long, value_name = "LEVEL", default_value = "error", value_parser = parse_severity)]
        violation_severity: Severity,

        #[command(flatten)]
        policy: PolicyArgs,

        /// Keep entity reference nodes in the tree
        #[arg(long)]
        entity_ref_nodes: bool,

        /// Disable namespace processing
        #[arg(long)]
        no_namespaces: bool,

        /// Print diagnostics as a JSON array
        #[arg(short, long)]
        json: bool,
    },

    /// Parse an XML document and write it back out
    Write {
        /// Path to the XML file
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Output encoding: UTF-8, UTF-16LE, UTF-16BE, ISO-8859-1, US-ASCII
        #[arg(short, long, default_value = "UTF-8")]
        encoding: String,

        /// Escaping: raw or charref
        #[arg(long, default_value = "charref")]
        escape: String,

        /// XSD schema to validate against (repeatable)
        #[arg(short, long, value_name = "SCHEMA")]
        schema: Vec<PathBuf>,

        /// Indent nested elements by N spaces
        #[arg(long, value_name = "N")]
        indent: Option<usize>,

        #[command(flatten)]
        policy: PolicyArgs,
    },
}

#[cfg(feature = "cli")]
fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Parse {
            file,
            schema,
            no_validate,
            lenient,
            entity_severity,
            violation_severity,
            policy,
            entity_ref_nodes,
            no_namespaces,
            json,
        } => {
            let options = ParseOptions::default()
                .with_validation(!no_validate && !schema.is_empty())
                .with_strict_on_errors(!lenient)
                .with_unresolved_entity_severity(entity_severity)
                .with_schema_violation_severity(violation_severity)
                .with_entity_reference_nodes(entity_ref_nodes)
                .with_namespaces(!no_namespaces);
            cmd_parse(file, schema, policy, options, json)
        }
        Commands::Write {
            file,
            output,
            encoding,
            escape,
            schema,
            indent,
            policy,
        } => cmd_write(file, output, encoding, escape, schema, indent, policy),
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

#[cfg(feature = "cli")]
fn parse_severity(s: &str) -> Result<Severity, String> {
    Severity::from_str(&s.to_ascii_lowercase()).map_err(|e| e.to_string())
}

#[cfg(feature = "cli")]
fn build_policy(args: PolicyArgs) -> Result<ResolutionPolicy, Box<dyn std::error::Error>> {
    if let Some(dir) = args.allow_local {
        return Ok(ResolutionPolicy::allow_local(dir));
    }
    if let Some(path) = args.catalog {
        return Ok(ResolutionPolicy::Catalog(XmlCatalog::from_file(path)?));
    }
    if !args.allow.is_empty() {
        return Ok(ResolutionPolicy::allow_list(args.allow));
    }
    Ok(ResolutionPolicy::DenyAll)
}

#[cfg(feature = "cli")]
fn build_parser(
    schemas: &[PathBuf],
    policy: ResolutionPolicy,
) -> Result<ValidatingParser, Box<dyn std::error::Error>> {
    let cache = GrammarCache::with_policy(policy.clone());
    for path in schemas {
        let grammar = cache.compile_file(path)?;
        log::info!("loaded schema '{}' for '{}'", path.display(), grammar.target_namespace());
    }
    Ok(ValidatingParser::new()
        .with_grammar_cache(Arc::new(cache))
        .with_policy(policy))
}

#[cfg(feature = "cli")]
fn report(diagnostics: &[Diagnostic], json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        eprintln!("{}", serde_json::to_string_pretty(diagnostics)?);
    } else {
        for diagnostic in diagnostics {
            eprintln!("{}", diagnostic);
        }
    }
    Ok(())
}

#[cfg(feature = "cli")]
fn cmd_parse(
    file: PathBuf,
    schemas: Vec<PathBuf>,
    policy: PolicyArgs,
    options: ParseOptions,
    json: bool,
) -> Result<bool, Box<dyn std::error::Error>> {
    let mut parser = build_parser(&schemas, build_policy(policy)?)?;

    match parser.parse_file(&file, &options) {
        Ok(parsed) => {
            report(&parsed.diagnostics, json)?;
            let errors = parsed
                .diagnostics
                .iter()
                .any(|d| d.severity >= Severity::Error);
            if !errors {
                println!("{}: ok", file.display());
            }
            Ok(!errors)
        }
        Err(failure) => {
            report(&failure.diagnostics, json)?;
            Ok(false)
        }
    }
}

#[cfg(feature = "cli")]
fn cmd_write(
    file: PathBuf,
    output: Option<PathBuf>,
    encoding: String,
    escape: String,
    schemas: Vec<PathBuf>,
    indent: Option<usize>,
    policy: PolicyArgs,
) -> Result<bool, Box<dyn std::error::Error>> {
    let encoding = Encoding::from_label(&encoding)?;
    let escape = EscapePolicy::from_name(&escape)?;
    let mut parser = build_parser(&schemas, build_policy(policy)?)?;

    let options = ParseOptions::default().with_validation(!schemas.is_empty());
    let parsed = match parser.parse_file(&file, &options) {
        Ok(parsed) => parsed,
        Err(failure) => {
            report(&failure.diagnostics, false)?;
            return Ok(false);
        }
    };
    report(&parsed.diagnostics, false)?;

    let mut serialize_options = SerializeOptions::default()
        .with_encoding(encoding)
        .with_escape(escape);
    serialize_options.indent = indent;
    let bytes = Serializer::new(serialize_options).serialize(&parsed.document)?;

    match output {
        Some(path) => fs::write(&path, bytes)?,
        None => {
            use std::io::Write;
            std::io::stdout().write_all(&bytes)?;
        }
    }
    Ok(true)
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Rebuild with --features cli");
    std::process::exit(1);
}
