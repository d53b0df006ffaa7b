use anyhow::{anyhow, Error, Result};
use clap::{Parser, Subcommand};
use log::info;
use oxigraph::io::{RdfFormat, RdfParser};
use oxigraph::model::{GraphName, NamedNode, Term};
use quadstore::{OpenMode, OpenStatus, QuadStore, StoreOptions, TripleKind, TripleStore};
use std::ffi::OsString;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Parser)]
#[command(name = "quadstore")]
#[command(about = "Load and query an on-disk quad store")]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Verbose mode - sets the RUST_LOG level to info, defaults to warning level
    #[clap(long, short, action, default_value = "false", global = true)]
    verbose: bool,
    /// Debug mode - sets the RUST_LOG level to debug, defaults to warning level
    #[clap(long, action, default_value = "false", global = true)]
    debug: bool,
    /// JSON file with store options; defaults are used for missing fields
    #[clap(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create a new, empty store
    Init {
        /// Directory to create the store in; must be absent or empty
        store: PathBuf,
        /// Also write the effective options to <store>/options.json, which later
        /// commands read when --config is not given
        #[clap(long, action, default_value = "false")]
        save_config: bool,
    },
    /// Parse an RDF file (N-Triples, N-Quads, Turtle, TriG, RDF/XML) into the store
    Load {
        store: PathBuf,
        file: PathBuf,
        /// Put every parsed triple into this graph instead of the file's own graphs
        #[clap(long, short)]
        graph: Option<String>,
        /// Add the triples as quoted (excluded from the union view)
        #[clap(long, action, default_value = "false")]
        quoted: bool,
        /// Input format by extension (ttl, nt, nq, trig, rdf); guessed from the file name otherwise
        #[clap(long, short)]
        format: Option<String>,
    },
    /// Add one triple to a graph. Terms use N-Triples syntax; bare IRIs are accepted
    Add {
        store: PathBuf,
        subject: String,
        predicate: String,
        object: String,
        #[clap(long, short)]
        graph: String,
        #[clap(long, action, default_value = "false")]
        quoted: bool,
    },
    /// Remove matching triples; with no pattern at all the store is cleared
    Remove {
        store: PathBuf,
        #[command(flatten)]
        pattern: Pattern,
    },
    /// Print matching triples with the graphs they were found in
    Query {
        store: PathBuf,
        #[command(flatten)]
        pattern: Pattern,
        /// Output JSON instead of text
        #[clap(long, action, default_value = "false")]
        json: bool,
    },
    /// Count the union triples, or the triples of one graph
    Len {
        store: PathBuf,
        #[clap(long, short)]
        graph: Option<String>,
    },
    /// List known graphs, or the graphs asserting one triple
    Contexts {
        store: PathBuf,
        #[clap(long, num_args = 3, value_names = ["S", "P", "O"])]
        triple: Option<Vec<String>>,
    },
    /// Register a graph without adding triples
    AddGraph { store: PathBuf, graph: String },
    /// Remove a graph and all of its triples
    RemoveGraph { store: PathBuf, graph: String },
    /// Print every entry of every store file
    Dump { store: PathBuf },
    /// Print counters for the store
    Stats {
        store: PathBuf,
        /// Output JSON instead of text
        #[clap(long, action, default_value = "false")]
        json: bool,
    },
    /// Delete the store directory
    Destroy {
        store: PathBuf,
        #[clap(long, short, action = clap::ArgAction::SetTrue, default_value = "false")]
        force: bool,
    },
}

impl Commands {
    fn store(&self) -> &Path {
        match self {
            Commands::Init { store, .. }
            | Commands::Load { store, .. }
            | Commands::Add { store, .. }
            | Commands::Remove { store, .. }
            | Commands::Query { store, .. }
            | Commands::Len { store, .. }
            | Commands::Contexts { store, .. }
            | Commands::AddGraph { store, .. }
            | Commands::RemoveGraph { store, .. }
            | Commands::Dump { store }
            | Commands::Stats { store, .. }
            | Commands::Destroy { store, .. } => store,
        }
    }
}

#[derive(Debug, clap::Args)]
struct Pattern {
    #[clap(long, short)]
    subject: Option<String>,
    #[clap(long, short)]
    predicate: Option<String>,
    #[clap(long, short)]
    object: Option<String>,
    #[clap(long, short)]
    graph: Option<String>,
}

/// Terms parsed from a [`Pattern`].
struct Terms {
    subject: Option<Term>,
    predicate: Option<Term>,
    object: Option<Term>,
    graph: Option<Term>,
}

impl Pattern {
    fn parse(&self) -> Result<Terms> {
        let parse = |v: &Option<String>| v.as_deref().map(parse_term).transpose();
        Ok(Terms {
            subject: parse(&self.subject)?,
            predicate: parse(&self.predicate)?,
            object: parse(&self.object)?,
            graph: parse(&self.graph)?,
        })
    }
}

/// Parses a term in N-Triples syntax (`<iri>`, `_:b`, `"lit"@en`); anything
/// else is taken as a bare IRI.
fn parse_term(s: &str) -> Result<Term> {
    if s.starts_with('<') || s.starts_with('"') || s.starts_with("_:") {
        return Term::from_str(s).map_err(|e| anyhow!("Invalid term {}: {}", s, e));
    }
    let iri = NamedNode::new(s).map_err(|e| anyhow!("Invalid IRI {}: {}", s, e))?;
    Ok(iri.into())
}

const OPTIONS_FILE: &str = "options.json";

/// Options from `--config`, else from the store's saved options file, else
/// the defaults.
fn load_options(config: Option<&Path>, store: &Path) -> Result<StoreOptions> {
    if let Some(path) = config {
        return Ok(StoreOptions::from_file(path)?);
    }
    let saved = store.join(OPTIONS_FILE);
    if saved.is_file() {
        info!("Using options saved in {}", saved.display());
        return Ok(StoreOptions::from_file(&saved)?);
    }
    Ok(StoreOptions::default())
}

fn open_existing(path: &Path, options: StoreOptions) -> Result<QuadStore> {
    let mut store = QuadStore::with_options(options);
    match store.open(path, OpenMode::Existing)? {
        OpenStatus::Valid => Ok(store),
        OpenStatus::NoStore => Err(anyhow!(
            "No store found at {}. Run `quadstore init {}` to create one.",
            path.display(),
            path.display()
        )),
    }
}

fn graph_term(graph: GraphName, fallback: &Term) -> Term {
    match graph {
        GraphName::NamedNode(n) => n.into(),
        GraphName::BlankNode(b) => b.into(),
        GraphName::DefaultGraph => fallback.clone(),
    }
}

/// Graph for triples a file puts in its default graph: the file's own IRI.
fn file_graph(file: &Path) -> Result<Term> {
    let absolute = std::fs::canonicalize(file)?;
    let iri = format!("file://{}", absolute.display());
    Ok(NamedNode::new(iri.clone())
        .map_err(|e| anyhow!("Cannot name graph after {}: {}", iri, e))?
        .into())
}

fn load_file(
    store: &mut QuadStore,
    file: &Path,
    graph: Option<&str>,
    kind: TripleKind,
    format: Option<&str>,
) -> Result<usize> {
    let ext = format
        .map(str::to_string)
        .or_else(|| file.extension().map(|e| e.to_string_lossy().to_string()))
        .unwrap_or_default();
    let format = RdfFormat::from_extension(&ext)
        .ok_or_else(|| anyhow!("Unknown RDF format for {} (use --format)", file.display()))?;
    let target = match graph {
        Some(g) => Some(parse_term(g)?),
        None => None,
    };
    let fallback = match &target {
        Some(t) => t.clone(),
        None => file_graph(file)?,
    };
    let reader = BufReader::new(std::fs::File::open(file)?);
    let mut added = 0usize;
    for quad in RdfParser::from_format(format).for_reader(reader) {
        let quad = quad?;
        let context = match &target {
            Some(t) => t.clone(),
            None => graph_term(quad.graph_name, &fallback),
        };
        let subject: Term = quad.subject.into();
        let predicate: Term = quad.predicate.into();
        if store.add(&subject, &predicate, &quad.object, &context, kind)? {
            added += 1;
        }
    }
    info!("Loaded {} new triples from {}", added, file.display());
    Ok(added)
}

pub fn run() -> Result<()> {
    quadstore::init_logging();
    let cmd = Cli::parse();
    execute(cmd)
}

pub fn run_from_args<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    quadstore::init_logging();
    let cmd = Cli::try_parse_from(args).map_err(Error::from)?;
    execute(cmd)
}

fn execute(cmd: Cli) -> Result<()> {
    // CLI flags take precedence over RUST_LOG / QUADSTORE_LOG; default is "warn".
    if cmd.debug {
        std::env::set_var("RUST_LOG", "debug");
    } else if cmd.verbose {
        std::env::set_var("RUST_LOG", "info");
    } else if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "warn");
    }
    let _ = env_logger::try_init();

    let options = load_options(cmd.config.as_deref(), cmd.command.store())?;
    if cmd.verbose || cmd.debug {
        println!("{}", serde_json::to_string_pretty(&options)?);
    }

    match cmd.command {
        Commands::Init { store, save_config } => {
            let mut qs = QuadStore::with_options(options.clone());
            qs.open(&store, OpenMode::Create)?;
            qs.close()?;
            if save_config {
                options.save_to_file(&store.join(OPTIONS_FILE))?;
            }
            println!("Created store at {}", store.display());
        }
        Commands::Load {
            store,
            file,
            graph,
            quoted,
            format,
        } => {
            let mut qs = open_existing(&store, options)?;
            let added = load_file(
                &mut qs,
                &file,
                graph.as_deref(),
                TripleKind::from(quoted),
                format.as_deref(),
            )?;
            qs.close()?;
            println!("Added {} triples", added);
        }
        Commands::Add {
            store,
            subject,
            predicate,
            object,
            graph,
            quoted,
        } => {
            let mut qs = open_existing(&store, options)?;
            let added = qs.add(
                &parse_term(&subject)?,
                &parse_term(&predicate)?,
                &parse_term(&object)?,
                &parse_term(&graph)?,
                TripleKind::from(quoted),
            )?;
            qs.close()?;
            if !added {
                println!("Triple already present");
            }
        }
        Commands::Remove { store, pattern } => {
            let terms = pattern.parse()?;
            let mut qs = open_existing(&store, options)?;
            let removed = qs.remove(
                terms.subject.as_ref(),
                terms.predicate.as_ref(),
                terms.object.as_ref(),
                terms.graph.as_ref(),
            )?;
            qs.close()?;
            println!("Removed {} triples", removed);
        }
        Commands::Query {
            store,
            pattern,
            json,
        } => {
            let terms = pattern.parse()?;
            let qs = open_existing(&store, options)?;
            let matches = qs.triples(
                terms.subject.as_ref(),
                terms.predicate.as_ref(),
                terms.object.as_ref(),
                terms.graph.as_ref(),
            )?;
            let mut rows = Vec::new();
            for matched in matches {
                let matched = matched?;
                let t = &matched.triple;
                let graphs: Vec<String> = matched.contexts.iter().map(|c| c.to_string()).collect();
                if json {
                    rows.push(serde_json::json!({
                        "subject": t.subject.to_string(),
                        "predicate": t.predicate.to_string(),
                        "object": t.object.to_string(),
                        "graphs": graphs,
                    }));
                } else {
                    println!(
                        "{} {} {} . # {}",
                        t.subject,
                        t.predicate,
                        t.object,
                        graphs.join(" ")
                    );
                }
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            }
        }
        Commands::Len { store, graph } => {
            let graph = graph.as_deref().map(parse_term).transpose()?;
            let qs = open_existing(&store, options)?;
            println!("{}", qs.len(graph.as_ref())?);
        }
        Commands::Contexts { store, triple } => {
            let triple = match triple {
                Some(parts) => Some(
                    parts
                        .iter()
                        .map(|p| parse_term(p))
                        .collect::<Result<Vec<Term>>>()?,
                ),
                None => None,
            };
            let qs = open_existing(&store, options)?;
            let contexts = match &triple {
                Some(t) => qs.contexts(Some((&t[0], &t[1], &t[2])))?,
                None => qs.contexts(None)?,
            };
            for context in contexts {
                println!("{}", context?);
            }
        }
        Commands::AddGraph { store, graph } => {
            let mut qs = open_existing(&store, options)?;
            qs.add_graph(&parse_term(&graph)?)?;
            qs.close()?;
        }
        Commands::RemoveGraph { store, graph } => {
            let mut qs = open_existing(&store, options)?;
            let removed = qs.remove_graph(&parse_term(&graph)?)?;
            qs.close()?;
            println!("Removed {} triples", removed);
        }
        Commands::Dump { store } => {
            let qs = open_existing(&store, options)?;
            print!("{}", qs.dump()?);
        }
        Commands::Stats { store, json } => {
            let qs = open_existing(&store, options)?;
            let stats = qs.stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("Graphs:  {}", stats.contexts);
                println!("Triples: {}", stats.triples);
                println!("Terms:   {}", stats.terms);
            }
        }
        Commands::Destroy { store, force } => {
            if !force {
                let mut input = String::new();
                println!(
                    "Are you sure you want to delete the store at {}? [y/N] ",
                    store.display()
                );
                std::io::stdin().read_line(&mut input)?;
                let input = input.trim();
                if input != "y" && input != "Y" {
                    println!("Aborting...");
                    return Ok(());
                }
            }
            QuadStore::new().destroy(&store)?;
            println!("Removed {}", store.display());
        }
    }

    Ok(())
}
