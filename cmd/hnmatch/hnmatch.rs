mod cli;

use std::fs;
use std::path::Path;

use anyhow::Context;
use clap::Parser;
use hntrie::{TrieContainer, TrieRef};
use tracing::info;

use crate::cli::{Command, HnMatchCLI};

fn main() -> anyhow::Result<()> {
    let options = HnMatchCLI::parse();

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(options.log_level)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set global tracing subscriber");

    match options.command {
        Command::Build { input, output } => build(&input, &output),
        Command::Query {
            snapshot,
            hostnames,
        } => query(&snapshot, &hostnames),
        Command::List { snapshot } => list(&snapshot),
        Command::Stats { snapshot } => stats(&snapshot),
    }
}

fn build(input: &Path, output: &Path) -> anyhow::Result<()> {
    let text =
        fs::read_to_string(input).with_context(|| format!("reading {}", input.display()))?;
    let mut container = TrieContainer::new();
    let mut trie = container.create_trie();
    let mut seen = 0usize;
    for line in text.lines() {
        let hostname = line.trim();
        if hostname.is_empty() || hostname.starts_with('#') {
            continue;
        }
        seen += 1;
        container.add_hostname(&mut trie, hostname);
    }
    let snapshot = container.snapshot();
    fs::write(output, &snapshot).with_context(|| format!("writing {}", output.display()))?;
    info!(
        seen,
        stored = trie.size(),
        bytes = snapshot.len(),
        "snapshot written to {}",
        output.display()
    );
    Ok(())
}

fn load(snapshot: &Path) -> anyhow::Result<(TrieContainer, TrieRef)> {
    let bytes = fs::read(snapshot).with_context(|| format!("reading {}", snapshot.display()))?;
    let container = TrieContainer::from_snapshot(&bytes)
        .with_context(|| format!("adopting snapshot {}", snapshot.display()))?;
    let trie = container.first_trie();
    Ok((container, trie))
}

fn query(snapshot: &Path, hostnames: &[String]) -> anyhow::Result<()> {
    let (mut container, trie) = load(snapshot)?;
    let mut missed = false;
    for hostname in hostnames {
        match container.matches_hostname(trie, hostname) {
            Some(k) => println!("{hostname}: matched {}", &hostname[k..]),
            None => {
                missed = true;
                println!("{hostname}: no match");
            }
        }
    }
    if missed {
        std::process::exit(1);
    }
    Ok(())
}

fn list(snapshot: &Path) -> anyhow::Result<()> {
    let (container, trie) = load(snapshot)?;
    for hostname in container.iter(trie) {
        println!("{hostname}");
    }
    Ok(())
}

fn stats(snapshot: &Path) -> anyhow::Result<()> {
    let (container, _) = load(snapshot)?;
    println!("{}", serde_json::to_string_pretty(&container.usage())?);
    Ok(())
}
