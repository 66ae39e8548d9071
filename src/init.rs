//! Project initialization for hpoa
//!
//! `hpoa init` creates `.hpoa/config.toml`, a `data/` directory for the
//! ontology and annotation downloads, and keeps those downloads and the
//! local curation state out of git.

use crate::config::{CONFIG_DIR, CONFIG_FILE};
use colored::Colorize;
use std::fs;
use std::path::Path;

/// Default configuration written by `hpoa init`
pub const CONFIG_TEMPLATE: &str = r#"# hpoa configuration
# Relative paths are resolved against the directory containing .hpoa/

[ontology]
# HPO release in OBO Graphs JSON (https://purl.obolibrary.org/obo/hp.json)
hp = "data/hp.json"
# Optional disease ontology used to check database_id values
# diseases = "data/mondo.json"
disease_prefix = "MONDO"
# Tree root shown by `hpoa tree` and the API
root = "HP:0000118"

[annotations]
# HPO annotation table (https://purl.obolibrary.org/obo/hp/hpoa/phenotype.hpoa)
path = "data/phenotype.hpoa"
# Approved tables are written back to `path` unless this is set
# output = "data/phenotype.curated.hpoa"

[reconcile]
# append | replace-by-key
policy = "append"
# off | warn | strict
strictness = "warn"

[suggester]
# Program that reads the curator's message on stdin and prints a JSON reply
# command = "curation-agent"
# args = ["--json"]
# Canned reply for offline work; wins over `command`
# file = "data/suggestion.json"
timeout_secs = 120
attempts = 2
backoff_ms = 500

[curator]
# Signs biocuration entries as HPO:<name>[YYYY-MM-DD]
# name = "jdoe"
"#;

/// Paths kept out of version control: downloads and per-checkout curation
/// state. The config itself stays tracked.
pub const IGNORED: [&str; 3] = ["data/", ".hpoa/pending.json", ".hpoa/applied"];

/// Initialize hpoa in `dir`
pub fn init_project(dir: &Path) -> Result<(), String> {
    println!("\n{}", "Initializing hpoa...".cyan().bold());
    println!("   Directory: {}\n", dir.display());

    let hpoa_dir = dir.join(CONFIG_DIR);
    ensure_dir(&hpoa_dir, CONFIG_DIR)?;
    ensure_config(&hpoa_dir.join(CONFIG_FILE))?;
    ensure_dir(&dir.join("data"), "data/")?;

    let added = ensure_ignored(&dir.join(".gitignore"), &IGNORED)?;
    if !added.is_empty() {
        println!("   {} .gitignore ({})", "Updated".green(), added.join(", "));
    }

    println!("\n{}", "hpoa initialized!".green().bold());
    println!("\nNext steps:");
    println!("  1. Download {} and {} into data/", "hp.json".cyan(), "phenotype.hpoa".cyan());
    println!("  2. Run {} to browse the hierarchy", "hpoa tree".cyan());
    println!("  3. Run {} to start the curation API", "hpoa serve".cyan());
    println!();

    Ok(())
}

fn ensure_dir(path: &Path, name: &str) -> Result<(), String> {
    if path.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(path).map_err(|e| format!("Could not create {}: {}", name, e))?;
    println!("   {} {}", "Creating".green(), name);
    Ok(())
}

/// Write the template unless a config is already there; an existing one
/// is never overwritten
fn ensure_config(path: &Path) -> Result<(), String> {
    let shown = format!("{}/{}", CONFIG_DIR, CONFIG_FILE);
    if path.exists() {
        println!("   {} {} (kept existing)", "Skipping".yellow(), shown);
        return Ok(());
    }
    fs::write(path, CONFIG_TEMPLATE).map_err(|e| format!("Could not write {}: {}", shown, e))?;
    println!("   {} {}", "Creating".green(), shown);
    Ok(())
}

/// Append the `entries` missing from a gitignore file, creating it if
/// needed. Returns the entries that were added.
fn ensure_ignored<'a>(path: &Path, entries: &[&'a str]) -> Result<Vec<&'a str>, String> {
    let existing = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(format!("Could not read .gitignore: {}", e)),
    };
    let present: Vec<&str> = existing.lines().map(|l| l.trim().trim_end_matches('/')).collect();
    let missing: Vec<&'a str> = entries
        .iter()
        .copied()
        .filter(|entry| !present.contains(&entry.trim_end_matches('/')))
        .collect();
    if missing.is_empty() {
        return Ok(missing);
    }

    let mut content = existing.trim_end().to_string();
    if !content.is_empty() {
        content.push_str("\n\n");
    }
    content.push_str("# hpoa downloads and local curation state\n");
    for entry in &missing {
        content.push_str(entry);
        content.push('\n');
    }
    fs::write(path, content).map_err(|e| format!("Could not update .gitignore: {}", e))?;
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::reconcile::{ApplyPolicy, Strictness};

    #[test]
    fn test_template_parses_to_defaults() {
        let config: Config = toml::from_str(CONFIG_TEMPLATE).unwrap();
        let defaults = Config::default();
        assert_eq!(config.ontology.hp, defaults.ontology.hp);
        assert_eq!(config.ontology.root, defaults.ontology.root);
        assert_eq!(config.annotations.path, defaults.annotations.path);
        assert_eq!(config.policy(), ApplyPolicy::Append);
        assert_eq!(config.strictness(), Strictness::Warn);
        assert!(config.suggester().is_none());
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "target/\ndata\n").unwrap();

        init_project(dir.path()).unwrap();
        init_project(dir.path()).unwrap();

        let config = Config::load_from(&dir.path().join(".hpoa/config.toml")).unwrap();
        assert_eq!(config.root, dir.path());
        assert!(dir.path().join("data").is_dir());

        let gitignore = std::fs::read_to_string(dir.path().join(".gitignore")).unwrap();
        assert!(gitignore.starts_with("target/\ndata\n"));
        assert!(!gitignore.contains("data/"));
        assert_eq!(gitignore.matches(".hpoa/pending.json").count(), 1);
        assert_eq!(gitignore.matches(".hpoa/applied").count(), 1);
    }

    #[test]
    fn test_local_state_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default().with_root(dir.path());
        let gitignore = dir.path().join(".gitignore");

        let added = ensure_ignored(&gitignore, &IGNORED).unwrap();
        assert_eq!(added, IGNORED.to_vec());
        let text = std::fs::read_to_string(&gitignore).unwrap();
        for path in [config.pending_path(), config.applied_path()] {
            let relative = path.strip_prefix(dir.path()).unwrap().to_string_lossy().replace('\\', "/");
            assert!(text.lines().any(|l| l == relative), "{} not ignored", relative);
        }
        assert!(ensure_ignored(&gitignore, &IGNORED).unwrap().is_empty());
    }

    #[test]
    fn test_existing_config_is_kept() {
        let dir = tempfile::tempdir().unwrap();
        let hpoa = dir.path().join(CONFIG_DIR);
        std::fs::create_dir_all(&hpoa).unwrap();
        std::fs::write(hpoa.join(CONFIG_FILE), "[curator]\nname = \"kept\"\n").unwrap();

        init_project(dir.path()).unwrap();
        let config = Config::load_from(&hpoa.join(CONFIG_FILE)).unwrap();
        assert_eq!(config.curator.name.as_deref(), Some("kept"));
    }
}
