//! DateSpoof CLI
//!
//! CLI tool for checking whitelists, evaluating settings and exercising the
//! time-source override outside the browser.

mod bench;
mod settings_file;
mod simulate;

use std::path::Path;

use clap::{Parser, Subcommand, ValueEnum};

use ds_core::coordinator::{Coordinator, EditOutcome, SpoofMode};
use ds_core::decision::{decide, injected_date, should_reload};
use ds_core::domain::{get_base_domain, is_whitelisted, parse_whitelist};
use ds_core::time_source::{compute_target_time, tomorrow_iso};

use crate::bench::BenchOptions;
use crate::settings_file::{read_settings, read_whitelist, FileStore};
use crate::simulate::{format_ms, time_source, SimulateOptions};

#[derive(Parser)]
#[command(name = "ds-cli")]
#[command(about = "DateSpoof whitelist and override tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum Mode {
    Full,
    Quick,
}

impl From<Mode> for SpoofMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Full => SpoofMode::Full,
            Mode::Quick => SpoofMode::Quick,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check hostnames against a whitelist
    Check {
        /// Whitelist file, one domain per line
        #[arg(short, long)]
        whitelist: String,

        /// Hostnames to check
        #[arg(required = true)]
        hosts: Vec<String>,

        /// Print the parsed whitelist
        #[arg(short, long)]
        verbose: bool,
    },

    /// Decide whether a page gets the override under a settings file
    Decide {
        /// Settings JSON file
        #[arg(short, long)]
        settings: String,

        /// Page hostname
        hostname: String,
    },

    /// Decide whether a tab should reload under a settings file
    Reload {
        /// Settings JSON file
        #[arg(short, long)]
        settings: String,

        /// Tab URL
        url: String,
    },

    /// Compute the instant a page clock would report
    Target {
        /// Requested date (YYYY-MM-DD); tomorrow when omitted or invalid
        date: Option<String>,

        /// Fixed UTC offset in minutes east; local time when omitted
        #[arg(long, allow_hyphen_values = true)]
        offset: Option<i32>,
    },

    /// Switch a spoofing mode on or off in a settings file
    Toggle {
        /// Settings JSON file (created if missing)
        #[arg(short, long)]
        settings: String,

        #[arg(value_enum)]
        mode: Mode,

        /// Turn the mode off instead of on
        #[arg(long)]
        off: bool,

        /// Date to store with the flag
        #[arg(short, long)]
        date: Option<String>,
    },

    /// Edit the date or whitelist in a settings file
    Edit {
        /// Settings JSON file (created if missing)
        #[arg(short, long)]
        settings: String,

        /// New target date (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<String>,

        /// Turn whitelist filtering on or off
        #[arg(long)]
        whitelist_enabled: Option<bool>,

        /// File with the new whitelist text
        #[arg(short, long)]
        whitelist: Option<String>,

        /// Current tab URL, checked for a reload after the edit
        #[arg(long)]
        url: Option<String>,
    },

    /// Install and clean up the override on a simulated page
    Simulate {
        /// Settings JSON file
        #[arg(short, long)]
        settings: String,

        /// Page hostname
        hostname: String,

        /// Fixed UTC offset in minutes east; local time when omitted
        #[arg(long, allow_hyphen_values = true)]
        offset: Option<i32>,

        /// Host refuses to redefine the time source
        #[arg(long)]
        locked: bool,

        /// Host refuses to delete the override markers
        #[arg(long)]
        sealed: bool,
    },

    /// Benchmark whitelist matching
    Bench {
        /// JSON array of hostnames
        #[arg(long)]
        hosts: Option<String>,

        /// Whitelist file
        #[arg(short, long)]
        whitelist: Option<String>,

        #[arg(short, long, default_value_t = 100)]
        iterations: usize,

        /// Synthetic host count when no host list is given
        #[arg(long, default_value_t = 1000)]
        synthetic_hosts: usize,

        #[arg(long, default_value_t = 1)]
        seed: u32,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Check {
            whitelist,
            hosts,
            verbose,
        } => cmd_check(&whitelist, &hosts, verbose),
        Commands::Decide { settings, hostname } => cmd_decide(&settings, &hostname),
        Commands::Reload { settings, url } => cmd_reload(&settings, &url),
        Commands::Target { date, offset } => cmd_target(date.as_deref(), offset),
        Commands::Toggle {
            settings,
            mode,
            off,
            date,
        } => cmd_toggle(&settings, mode, !off, date.as_deref()),
        Commands::Edit {
            settings,
            date,
            whitelist_enabled,
            whitelist,
            url,
        } => cmd_edit(&settings, date.as_deref(), whitelist_enabled, whitelist.as_deref(), url.as_deref()),
        Commands::Simulate {
            settings,
            hostname,
            offset,
            locked,
            sealed,
        } => read_settings(Path::new(&settings)).and_then(|settings| {
            simulate::run_simulate(SimulateOptions {
                settings,
                hostname,
                offset_minutes: offset,
                locked,
                sealed,
            })
        }),
        Commands::Bench {
            hosts,
            whitelist,
            iterations,
            synthetic_hosts,
            seed,
        } => bench::run_bench(BenchOptions {
            hosts_path: hosts,
            whitelist_path: whitelist,
            iterations,
            synthetic_hosts,
            seed,
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn cmd_check(whitelist_path: &str, hosts: &[String], verbose: bool) -> Result<(), String> {
    let raw = read_whitelist(Path::new(whitelist_path))?;
    let entries = parse_whitelist(&raw);

    if entries.is_empty() {
        println!("Whitelist '{}' has no valid entries", whitelist_path);
    } else if verbose {
        println!("Whitelist '{}' ({} entries):", whitelist_path, entries.len());
        for entry in &entries {
            println!("  {}", entry);
        }
    }

    for host in hosts {
        let host = host.trim().to_ascii_lowercase();
        let verdict = if is_whitelisted(&host, &raw) { "match" } else { "no match" };
        println!("{:<40} {:<10} (base: {})", host, verdict, get_base_domain(&host));
    }

    Ok(())
}

fn cmd_decide(settings_path: &str, hostname: &str) -> Result<(), String> {
    let settings = read_settings(Path::new(settings_path))?;
    let hostname = hostname.trim().to_ascii_lowercase();

    if decide(&settings, &hostname) {
        let date = injected_date(&settings).unwrap_or("tomorrow");
        println!("inject: yes (date: {})", date);
    } else if !settings.is_active() {
        println!("inject: no (spoofing is off)");
    } else {
        println!("inject: no ('{}' is not whitelisted)", hostname);
    }

    Ok(())
}

fn cmd_reload(settings_path: &str, url: &str) -> Result<(), String> {
    let settings = read_settings(Path::new(settings_path))?;
    let reload = should_reload(url, settings.whitelist_enabled, &settings.whitelist);
    println!("reload: {}", if reload { "yes" } else { "no" });
    Ok(())
}

fn cmd_target(date: Option<&str>, offset: Option<i32>) -> Result<(), String> {
    let source = time_source(offset)?;
    let target = compute_target_time(date, source.as_ref());

    println!("Now:      {}", format_ms(source.now()));
    println!("Target:   {} ({} ms)", format_ms(target), target);
    println!("Tomorrow: {}", tomorrow_iso(source.as_ref()));

    Ok(())
}

fn cmd_toggle(settings_path: &str, mode: Mode, enabled: bool, date: Option<&str>) -> Result<(), String> {
    let store = FileStore::new(settings_path);
    let mut coordinator = Coordinator::new(store, time_source(None)?);
    let outcome = coordinator.toggle(mode.into(), enabled, date);

    if !outcome.saved {
        return Err(format!(
            "Failed to save '{}' after {} attempts",
            settings_path, outcome.attempts
        ));
    }

    let settings = coordinator.load_settings();
    let json = settings.to_json().map_err(|e| format!("Failed to serialize JSON: {}", e))?;
    println!("Saved '{}' ({} attempt(s))", settings_path, outcome.attempts);
    println!("{}", json);
    if outcome.cleanup_tabs {
        println!("  Open tabs need cleanup");
    }

    Ok(())
}

fn cmd_edit(
    settings_path: &str,
    date: Option<&str>,
    whitelist_enabled: Option<bool>,
    whitelist_path: Option<&str>,
    url: Option<&str>,
) -> Result<(), String> {
    let whitelist = whitelist_path.map(|path| read_whitelist(Path::new(path))).transpose()?;

    let store = FileStore::new(settings_path);
    let mut coordinator = Coordinator::new(store, time_source(None)?);
    if coordinator.save_defaults_if_needed() {
        println!("Stored default date and whitelist");
    }

    let mut edits: Vec<(&str, EditOutcome)> = Vec::new();
    if let Some(date) = date {
        edits.push(("date", coordinator.set_date(date)));
    }
    if let Some(enabled) = whitelist_enabled {
        edits.push(("whitelist toggle", coordinator.set_whitelist_enabled(enabled)));
    }
    if let Some(raw) = &whitelist {
        edits.push(("whitelist", coordinator.save_whitelist(raw)));
    }

    let mut refresh = false;
    for (what, outcome) in &edits {
        if !outcome.saved {
            return Err(format!("Failed to save {} after {} attempts", what, outcome.attempts));
        }
        println!("Saved {} ({} attempt(s))", what, outcome.attempts);
        refresh |= outcome.refresh;
    }

    if let (true, Some(url)) = (refresh, url) {
        let reload = coordinator.refresh(url);
        println!("reload: {}", if reload { "yes" } else { "no" });
    }

    Ok(())
}
