use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use hpoa_builder::export::{changes_to_markdown, tree_to_dot, tree_to_outline, DotConfig};
use hpoa_builder::reconcile::{self, fingerprint, ApplyPolicy, ApplyResult, FlatChange, Strictness};
use hpoa_builder::serve::{start_server, ServerState};
use hpoa_builder::suggest::{parse_reply, FileSuggester, SuggestionSource};
use hpoa_builder::{filter, init, materialize, Config, Curie, Workspace};
use std::path::{Path, PathBuf};
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "hpoa")]
#[command(author, version, about = "Browse the HPO hierarchy and curate phenotype.hpoa annotations")]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: .hpoa/config.toml in this or a parent directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// More logging: -v for info, -vv for debug (HPOA_LOG overrides)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum TreeFormat {
    Outline,
    Dot,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create .hpoa/config.toml and the data/ directory here
    Init,

    /// Print an ontology hierarchy
    Tree {
        /// hp, or the configured disease ontology prefix
        #[arg(long, default_value = "hp")]
        ontology: String,

        /// Root term (default: the configured root)
        #[arg(long)]
        root: Option<String>,

        /// Keep only branches leading to terms whose label contains this
        #[arg(short, long)]
        query: Option<String>,

        /// Stop below this depth (ignored with --query)
        #[arg(short, long)]
        depth: Option<usize>,

        #[arg(short, long, value_enum, default_value = "outline")]
        format: TreeFormat,
    },

    /// Search terms by label or id
    Terms {
        query: String,

        #[arg(long, default_value = "hp")]
        ontology: String,

        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// List disease names in the annotation table
    Diseases {
        /// Case-insensitive substring filter
        #[arg(short, long)]
        query: Option<String>,
    },

    /// Show the annotation rows of one or more diseases
    Annotations {
        /// Disease name, repeatable
        #[arg(short, long = "disease", required = true)]
        diseases: Vec<String>,

        /// Print rows as JSON
        #[arg(long)]
        json: bool,
    },

    /// Ask the suggester for changes and save them for review
    Suggest {
        /// What to ask for
        message: String,

        /// Give the rows of this disease as context, repeatable
        #[arg(short, long = "disease")]
        diseases: Vec<String>,

        /// Read the reply from this file instead of the configured suggester
        #[arg(long)]
        reply_file: Option<PathBuf>,

        /// Where to save the change set (default: .hpoa/pending.json)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Merge a change set into the annotation table
    Apply {
        /// Change set: a saved suggestion, or a suggester reply
        changes: PathBuf,

        #[arg(long)]
        policy: Option<ApplyPolicy>,

        #[arg(long)]
        strictness: Option<Strictness>,

        /// Apply even if this change set was applied before
        #[arg(long)]
        force: bool,

        /// Report what would change without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Write the table here instead of the configured output
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Start the curation API server
    Serve {
        #[arg(short, long, default_value = "3000")]
        port: u16,
    },

    /// Generate shell completions
    Completion {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

fn init_logging(verbose: u8) {
    let level = std::env::var("HPOA_LOG")
        .ok()
        .and_then(|value| value.parse::<Level>().ok())
        .unwrap_or(match verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        });
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    let result = match args.command {
        Command::Init => std::env::current_dir()
            .map_err(|e| e.to_string())
            .and_then(|dir| init::init_project(&dir)),
        Command::Completion { shell } => {
            clap_complete::generate(shell, &mut Args::command(), "hpoa", &mut std::io::stdout());
            Ok(())
        }
        command => load_config(args.config.as_deref()).and_then(|config| run(command, config)),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<Config, String> {
    match path {
        Some(path) => Config::load_from(path).map_err(|e| e.to_string()),
        None => Ok(Config::load()),
    }
}

fn run(command: Command, config: Config) -> Result<(), String> {
    match command {
        Command::Tree {
            ontology,
            root,
            query,
            depth,
            format,
        } => show_tree(&Workspace::new(config), &ontology, root, query, depth, format),
        Command::Terms {
            query,
            ontology,
            limit,
        } => {
            let onto = Workspace::new(config).ontology(&ontology).map_err(|e| e.to_string())?;
            let hits = onto.search(&query, limit);
            if hits.is_empty() {
                println!("No terms match '{}'", query);
            }
            for term in hits {
                println!("{}  {}", term.id.to_string().cyan(), term.name);
            }
            Ok(())
        }
        Command::Diseases { query } => {
            let store = Workspace::new(config).store().map_err(|e| e.to_string())?;
            let names = match &query {
                Some(q) => store.search_diseases(q),
                None => store.disease_names(),
            };
            for name in &names {
                println!("{}", name);
            }
            println!("{}", format!("{} disease(s)", names.len()).dimmed());
            Ok(())
        }
        Command::Annotations { diseases, json } => {
            let store = Workspace::new(config).store().map_err(|e| e.to_string())?;
            let rows = store.select_diseases(&diseases);
            if json {
                let out = serde_json::to_string_pretty(&rows).map_err(|e| e.to_string())?;
                println!("{}", out);
                return Ok(());
            }
            for row in &rows {
                let qualifier = if row.qualifier.is_empty() {
                    String::new()
                } else {
                    format!("{} ", row.qualifier.red())
                };
                println!(
                    "{}  {}{}  {} {} {}",
                    row.database_id.cyan(),
                    qualifier,
                    row.hpo_id.bold(),
                    row.evidence,
                    row.frequency,
                    row.reference.dimmed()
                );
            }
            println!("{}", format!("{} row(s)", rows.len()).dimmed());
            Ok(())
        }
        Command::Suggest {
            message,
            diseases,
            reply_file,
            out,
        } => suggest(config, &message, &diseases, reply_file, out),
        Command::Apply {
            changes,
            policy,
            strictness,
            force,
            dry_run,
            output,
        } => {
            let mut config = config;
            if let Some(policy) = policy {
                config.reconcile.policy = policy;
            }
            if let Some(strictness) = strictness {
                config.reconcile.strictness = strictness;
            }
            apply_changes(config, &changes, force, dry_run, output)
        }
        Command::Serve { port } => {
            let workspace = Workspace::new(config);
            let session = workspace.session().map_err(|e| e.to_string())?;
            start_server(ServerState::new(workspace, session), port).map_err(|e| e.to_string())
        }
        Command::Init | Command::Completion { .. } => Ok(()),
    }
}

fn show_tree(
    workspace: &Workspace,
    ontology: &str,
    root: Option<String>,
    query: Option<String>,
    depth: Option<usize>,
    format: TreeFormat,
) -> Result<(), String> {
    let onto = workspace.ontology(ontology).map_err(|e| e.to_string())?;
    let root = root.unwrap_or_else(|| workspace.default_root(&onto));
    let root = Curie::parse(&root).map_err(|e| e.to_string())?;
    let tree = materialize(&onto, &root).map_err(|e| e.to_string())?;

    let (tree, depth) = match query.as_deref() {
        Some(q) => match filter(&tree, q) {
            Some(filtered) => (filtered.root, None),
            None => {
                println!("No terms under {} match '{}'", root, q);
                return Ok(());
            }
        },
        None => (tree, depth),
    };

    let out = match format {
        TreeFormat::Outline => tree_to_outline(&tree, depth),
        TreeFormat::Dot => tree_to_dot(
            &tree,
            &DotConfig {
                title: Some(tree.label.clone()),
                max_depth: depth,
                ..Default::default()
            },
        ),
        TreeFormat::Json => {
            let tree = match depth {
                Some(n) => tree.limit_depth(n),
                None => tree,
            };
            serde_json::to_string_pretty(&tree).map_err(|e| e.to_string())?
        }
    };
    print!("{}", out);
    if !out.ends_with('\n') {
        println!();
    }
    Ok(())
}

fn suggest(
    config: Config,
    message: &str,
    diseases: &[String],
    reply_file: Option<PathBuf>,
    out: Option<PathBuf>,
) -> Result<(), String> {
    let source: Box<dyn SuggestionSource> = match reply_file {
        Some(path) => Box::new(FileSuggester::new(path)),
        None => config
            .suggester()
            .ok_or("no suggester configured; set [suggester] command or file in .hpoa/config.toml")?,
    };
    let out = out.unwrap_or_else(|| config.pending_path());

    let session = Workspace::new(config).session().map_err(|e| e.to_string())?;
    let reply = session.request_suggestions(&*source, message, diseases);
    if reply.text.starts_with("Error:") {
        return Err(reply.text.trim_start_matches("Error:").trim().to_string());
    }

    println!("{}\n", reply.text);
    if reply.changes.is_empty() {
        return Ok(());
    }
    print!("{}", changes_to_markdown(&reply.changes, "Proposed changes"));

    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    let json = serde_json::to_string_pretty(&reply.changes).map_err(|e| e.to_string())?;
    std::fs::write(&out, json).map_err(|e| format!("Could not write {}: {}", out.display(), e))?;
    println!(
        "\n{} {} change(s) to {}",
        "Saved".green(),
        reply.changes.len(),
        out.display()
    );
    println!("Review them, then run {}", format!("hpoa apply {}", out.display()).cyan());
    Ok(())
}

fn read_change_set(path: &Path) -> Result<Vec<FlatChange>, String> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("Could not read {}: {}", path.display(), e))?;
    let output = parse_reply(&text).map_err(|e| e.to_string())?;
    Ok(reconcile::flatten(&output.annotations))
}

/// Ledger key for a table file, stable across working directories
fn table_identity(table: &Path) -> String {
    std::fs::canonicalize(table)
        .or_else(|_| std::env::current_dir().map(|cwd| cwd.join(table)))
        .unwrap_or_else(|_| table.to_path_buf())
        .display()
        .to_string()
}

/// Fingerprints already applied to `table`. The ledger holds one
/// `fingerprint<TAB>table` line per applied change set.
fn read_applied(ledger: &Path, table: &str) -> Vec<String> {
    std::fs::read_to_string(ledger)
        .map(|text| {
            text.lines()
                .filter_map(|line| line.split_once('\t'))
                .filter(|(_, target)| *target == table)
                .map(|(print, _)| print.to_string())
                .collect()
        })
        .unwrap_or_default()
}

fn record_applied(ledger: &Path, print: &str, table: &str) -> Result<(), String> {
    let entry = format!("{}\t{}", print, table);
    let mut lines: Vec<String> = std::fs::read_to_string(ledger)
        .map(|text| text.lines().map(str::to_string).collect())
        .unwrap_or_default();
    if lines.contains(&entry) {
        return Ok(());
    }
    lines.push(entry);
    if let Some(parent) = ledger.parent() {
        std::fs::create_dir_all(parent).map_err(|e| e.to_string())?;
    }
    std::fs::write(ledger, lines.join("\n") + "\n").map_err(|e| e.to_string())
}

fn apply_changes(
    config: Config,
    path: &Path,
    force: bool,
    dry_run: bool,
    output: Option<PathBuf>,
) -> Result<(), String> {
    let changes = read_change_set(path)?;
    if changes.is_empty() {
        println!("No changes in {}", path.display());
        return Ok(());
    }
    let ledger = config.applied_path();
    let output = output.unwrap_or_else(|| config.output_path());
    let session = Workspace::new(config).session().map_err(|e| e.to_string())?;

    if dry_run {
        print_result(&session.preview(Some(changes)));
        println!("{}", "Dry run: nothing written".dimmed());
        return Ok(());
    }

    let print = fingerprint(&changes);
    let session = session.with_applied(read_applied(&ledger, &table_identity(&output)));
    let result = session
        .approve_and_save(Some(changes), force, &output)
        .map_err(|e| e.to_string())?;
    record_applied(&ledger, &print, &table_identity(&output))?;

    print_result(&result);
    println!("{} {} ({} rows)", "Wrote".green(), output.display(), result.rows.len());
    Ok(())
}

fn print_result(result: &ApplyResult) {
    println!(
        "{} added, {} removed, {} replaced",
        result.added.to_string().green(),
        result.removed.to_string().red(),
        result.replaced.to_string().yellow()
    );
    for issue in &result.rejected {
        println!("  {} {}", "rejected".red().bold(), issue);
    }
    for issue in &result.flagged {
        println!("  {} {}", "flagged".yellow(), issue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_apply_flags_parse() {
        let args = Args::parse_from([
            "hpoa",
            "apply",
            "changes.json",
            "--policy",
            "replace-by-key",
            "--strictness",
            "strict",
            "-vv",
        ]);
        assert_eq!(args.verbose, 2);
        match args.command {
            Command::Apply {
                policy, strictness, ..
            } => {
                assert_eq!(policy, Some(ApplyPolicy::ReplaceByKey));
                assert_eq!(strictness, Some(Strictness::Strict));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_applied_ledger_is_per_table() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = dir.path().join(".hpoa").join("applied");
        assert!(read_applied(&ledger, "/data/a.hpoa").is_empty());

        record_applied(&ledger, "abc", "/data/a.hpoa").unwrap();
        record_applied(&ledger, "abc", "/data/a.hpoa").unwrap();
        record_applied(&ledger, "def", "/data/a.hpoa").unwrap();
        record_applied(&ledger, "abc", "/tmp/scratch.hpoa").unwrap();
        assert_eq!(read_applied(&ledger, "/data/a.hpoa"), vec!["abc", "def"]);
        assert_eq!(read_applied(&ledger, "/tmp/scratch.hpoa"), vec!["abc"]);
        assert!(read_applied(&ledger, "/data/b.hpoa").is_empty());
        assert_eq!(std::fs::read_to_string(&ledger).unwrap().lines().count(), 3);
    }

    #[test]
    fn test_table_identity_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let table = dir.path().join("t.hpoa");
        let before = table_identity(&table);
        std::fs::write(&table, "").unwrap();
        assert_eq!(table_identity(&table), std::fs::canonicalize(&table).unwrap().display().to_string());
        assert!(Path::new(&before).is_absolute());
    }
}
