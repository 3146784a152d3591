use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use globset::{Glob, GlobSet, GlobSetBuilder};
use par1_core::decode::repair;
use par1_core::encode::{encode, EncodeInput};
use par1_core::error::ParError;
use par1_core::header::FileStatus;
use par1_core::host::HostServices;
use par1_core::set::Set;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Default working-memory budget at `--memory 100`. There is no portable
/// `GlobalMemoryStatus` equivalent in a cross-platform crate (see
/// DESIGN.md); `--memory` scales this fixed baseline instead of an actual
/// system-free-memory probe.
const MEMORY_BASELINE_BYTES: u64 = 64 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "par1", version, about = "PAR v1.0 parity archive tool")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Create a new PAR set from the files in a directory.
    Create {
        /// Directory holding the files to protect; also names the set
        /// (`<base-path>.par`, `<base-path>.p01`, ...).
        base_path: PathBuf,
        /// Parity volumes as a percentage of the recoverable file count.
        #[arg(long, default_value_t = 10)]
        ratio: u32,
        /// Working-memory budget as a percentage of the baseline chunk
        /// budget (caps the per-pass working chunk size).
        #[arg(long, default_value_t = 100)]
        memory: u32,
        /// Explicit recoverable input file (repeatable). Overrides the
        /// directory scan when given.
        #[arg(short = 'r', long = "recoverable")]
        recoverable: Vec<PathBuf>,
        /// Explicit non-recoverable input file: catalogued but not
        /// protected by the code (repeatable).
        #[arg(short = 'n', long = "non-recoverable")]
        non_recoverable: Vec<PathBuf>,
        /// Disable double-buffered overlapped reads.
        #[arg(long, default_value_t = false)]
        no_overlapped_io: bool,
        /// Only include files matching this glob when scanning
        /// `base-path` (repeatable; ignored when `-r`/`-n` are given).
        #[arg(long)]
        include: Vec<String>,
        /// Exclude files matching this glob when scanning `base-path`
        /// (repeatable; applied after `--include`).
        #[arg(long)]
        exclude: Vec<String>,
    },
    /// Verify every file in a set against its PAR index.
    Verify {
        par_path: PathBuf,
    },
    /// Reconstruct missing/corrupt recoverable files and re-verify.
    Repair {
        par_path: PathBuf,
        /// Restrict reconstruction to a single named data file.
        #[arg(long)]
        only: Option<String>,
    },
    /// Print the classification of every file in a set (read-only).
    List {
        par_path: PathBuf,
        /// Emit machine-readable JSON instead of the human-readable table.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Print whether the set is currently repairable and why (read-only).
    Audit {
        par_path: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            3
        }
    };
    std::process::exit(code);
}

fn progress_host(memory_percent: u32, overlapped_io: bool) -> HostServices<'static> {
    let working_memory_bytes = (MEMORY_BASELINE_BYTES * memory_percent as u64) / 100;
    HostServices::new(
        working_memory_bytes.max(64 * 1024),
        overlapped_io,
        Box::new(|tag: &str, pct: u8| {
            if tag == "warn" {
                eprintln!("warning: set entry has unknown status bits, masked to the recoverable flag");
            } else if tag == "warn-duplicate-fingerprint" {
                eprintln!("warning: duplicate file fingerprint detected within this set");
            } else {
                eprintln!("[{tag}] {pct}%");
            }
            true
        }),
    )
}

fn run(cli: Cli) -> Result<i32> {
    match cli.cmd {
        Cmd::Create {
            base_path,
            ratio,
            memory,
            recoverable,
            non_recoverable,
            no_overlapped_io,
            include,
            exclude,
        } => cmd_create(&base_path, ratio, memory, recoverable, non_recoverable, !no_overlapped_io, &include, &exclude),
        Cmd::Verify { par_path } => cmd_verify(&par_path),
        Cmd::Repair { par_path, only } => cmd_repair(&par_path, only.as_deref()),
        Cmd::List { par_path, json } => cmd_list(&par_path, json),
        Cmd::Audit { par_path } => cmd_audit(&par_path),
    }
}

fn cmd_create(
    base_path: &Path,
    ratio: u32,
    memory: u32,
    recoverable: Vec<PathBuf>,
    non_recoverable: Vec<PathBuf>,
    overlapped_io: bool,
    include: &[String],
    exclude: &[String],
) -> Result<i32> {
    let base_name = base_path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("base path has no usable file name"))?
        .to_string();

    let mut inputs: Vec<EncodeInput> = Vec::new();
    if recoverable.is_empty() && non_recoverable.is_empty() {
        let include_set = build_glob_set(include)?;
        let exclude_set = build_glob_set(exclude)?;
        for input in par1_core::encode::inputs_from_dir(base_path).context("scanning base-path directory")? {
            // A set's own index/volumes live alongside the files they
            // protect; re-running `create` over the same directory must not
            // feed them back in as data.
            if is_own_set_output(&input.name, &base_name) {
                continue;
            }
            if !include_set.is_empty() && !include_set.is_match(&input.name) {
                continue;
            }
            if exclude_set.is_match(&input.name) {
                continue;
            }
            inputs.push(input);
        }
    } else {
        // Explicit file selections name files relative to `base_path`: the
        // PAR set is written alongside the files it protects, and the set
        // manager's sibling/data-file lookup (`DataFileRecord::path`)
        // always resolves names relative to the directory holding the
        // `.par` index, so every protected file must live directly under
        // `base_path`.
        for rel in recoverable {
            let name = file_name_of(&rel)?;
            inputs.push(EncodeInput { path: base_path.join(&rel), name, recoverable: true });
        }
        for rel in non_recoverable {
            let name = file_name_of(&rel)?;
            inputs.push(EncodeInput { path: base_path.join(&rel), name, recoverable: false });
        }
    }

    let n = inputs.iter().filter(|f| f.recoverable).count();
    if n == 0 {
        return Err(anyhow!("no recoverable files to protect"));
    }
    let m = (((n as u64 * ratio as u64) + 99) / 100).max(1).min(n as u64) as usize;

    std::fs::create_dir_all(base_path).ok();

    let mut host = progress_host(memory, overlapped_io);
    encode(&inputs, m, base_path, &base_name, &mut host).context("encoding parity set")?;

    let produced = base_path.join(format!("{base_name}.par"));
    let display_path = std::env::current_dir()
        .ok()
        .and_then(|cwd| pathdiff::diff_paths(&produced, cwd))
        .unwrap_or(produced);
    println!("created {} with {m} parity volume(s) over {n} recoverable file(s)", display_path.display());
    Ok(0)
}

/// True if `name` looks like this set's own index or a `.pNN`/`.qNN`
/// parity volume sharing `base_name`'s stem, so a directory re-scan never
/// re-ingests a set's own output as data.
fn is_own_set_output(name: &str, base_name: &str) -> bool {
    let path = Path::new(name);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    if stem != base_name {
        return false;
    }
    let ext = match path.extension().and_then(|e| e.to_str()) {
        Some(e) => e.to_ascii_lowercase(),
        None => return false,
    };
    if ext == "par" {
        return true;
    }
    ext.len() == 3 && (ext.as_bytes()[0] == b'p' || ext.as_bytes()[0] == b'q') && ext.as_bytes()[1..].iter().all(|b| b.is_ascii_digit())
}

fn build_glob_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("invalid glob pattern '{pattern}'"))?);
    }
    builder.build().context("building glob set")
}

fn file_name_of(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("{} has no usable file name", path.display()))
}

fn load_and_classify(par_path: &Path, host: &mut HostServices) -> Result<Set> {
    let mut set = Set::load_with_host(par_path, host).context("loading PAR header")?;
    set.classify_data_files(host).context("classifying data files")?;
    set.validate_parity_volumes().context("validating parity volumes")?;
    Ok(set)
}

fn cmd_verify(par_path: &Path) -> Result<i32> {
    let mut host = progress_host(100, false);
    let set = match load_and_classify(par_path, &mut host) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e:#}");
            return Ok(3);
        }
    };

    let all_valid = set.data_files.iter().all(|r| r.status == FileStatus::Valid);
    if all_valid {
        println!("OK: all {} file(s) valid", set.data_files.len());
        return Ok(0);
    }
    if set.recovery_feasible() {
        println!("REPAIRABLE: some files need repair, enough parity is present");
        print_statuses(&set);
        Ok(1)
    } else {
        println!("UNRECOVERABLE: not enough valid parity volumes to repair every missing file");
        print_statuses(&set);
        Ok(2)
    }
}

fn cmd_repair(par_path: &Path, only: Option<&str>) -> Result<i32> {
    let mut host = progress_host(100, false);
    let mut set = match load_and_classify(par_path, &mut host) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e:#}");
            return Ok(3);
        }
    };

    if !set.recovery_feasible() {
        println!("UNRECOVERABLE: at least one additional valid parity or data file is needed");
        return Ok(2);
    }

    match repair(&mut set, &mut host, only) {
        Ok(()) => {}
        Err(ParError::Unrecoverable(missing, valid_parity, needed)) => {
            println!(
                "UNRECOVERABLE: {missing} file(s) missing, {valid_parity} valid parity volume(s), need at least {needed}"
            );
            return Ok(2);
        }
        Err(e) => {
            eprintln!("error: {e:#}");
            return Ok(3);
        }
    }

    // Re-verify per spec.md §4.I: reconstructed files go back to Unknown
    // until a subsequent verify pass re-confirms them.
    let mut reverify_host = progress_host(100, false);
    let reverified = load_and_classify(par_path, &mut reverify_host)?;
    if reverified.data_files.iter().all(|r| r.status == FileStatus::Valid) {
        println!("repaired and re-verified: all files valid");
        Ok(0)
    } else {
        println!("repair completed but re-verify still reports issues");
        print_statuses(&reverified);
        Ok(2)
    }
}

#[derive(Serialize)]
struct ListFileEntry {
    name: String,
    size: u64,
    recoverable: bool,
    status: &'static str,
}

#[derive(Serialize)]
struct ListOutput {
    base_name: String,
    files: Vec<ListFileEntry>,
    parity_volumes: Vec<u64>,
}

fn cmd_list(par_path: &Path, json: bool) -> Result<i32> {
    let set = Set::load(par_path)?;
    if json {
        let out = ListOutput {
            base_name: set.base_name.clone(),
            files: set
                .data_files
                .iter()
                .map(|r| ListFileEntry {
                    name: r.name.clone(),
                    size: r.size,
                    recoverable: r.recoverable,
                    status: r.status.status_str(),
                })
                .collect(),
            parity_volumes: set.parity_volumes.iter().map(|v| v.volume_number).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(0);
    }

    println!("set {} ({} recoverable of {} file(s))", set.base_name, set.recoverable_count(), set.data_files.len());
    for r in &set.data_files {
        println!("  {:<10} {:>10} bytes  recoverable={}  {}", r.name, r.size, r.recoverable, r.status.status_str());
    }
    for v in &set.parity_volumes {
        println!("  volume {:<3} {}", v.volume_number, v.status.status_str());
    }
    Ok(0)
}

fn cmd_audit(par_path: &Path) -> Result<i32> {
    let mut host = progress_host(100, false);
    let set = load_and_classify(par_path, &mut host)?;
    let missing = set.recoverable_validity_mask().iter().filter(|&&v| !v).count();
    let valid_parity = set.valid_parity_volume_numbers().len();
    println!("recoverable files missing or corrupt: {missing}");
    println!("valid parity volumes available: {valid_parity}");
    println!("Repairable: {}", if set.recovery_feasible() { "YES" } else { "NO" });
    Ok(0)
}

fn print_statuses(set: &Set) {
    for r in &set.data_files {
        if r.status != FileStatus::Valid {
            println!("  {} : {}", r.name, r.status.status_str());
        }
    }
}
