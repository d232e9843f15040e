use clap::{Parser, Subcommand};
use civblp::allocation::Allocation;
use civblp::archive::{BlpFile, ParseOptions};
use civblp::header::StripeKind;
use civblp::recovery::scan;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "civblp", about = "Inspect CIVBLP package files")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Pointer hops followed before a value decodes as null
    #[arg(long, default_value = "32", global = true)]
    max_depth: usize,
    /// Records decoded beneath each dumped object before pointers decode as null
    #[arg(long, default_value = "1048576", global = true)]
    max_records: usize,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show header, preamble and stripe layout
    Info {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// List allocations
    List {
        input: PathBuf,
        /// Only allocations of this type
        #[arg(short, long)]
        type_name: Option<String>,
    },
    /// Show the type registry, or one type's layout
    Types {
        input: PathBuf,
        name: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Decode objects as JSON
    Dump {
        input: PathBuf,
        /// Allocation index
        #[arg(short, long)]
        index: Option<usize>,
        /// Every allocation of this type
        #[arg(short, long)]
        type_name: Option<String>,
        /// Maximum objects to print
        #[arg(short, long, default_value = "16")]
        limit: usize,
    },
    /// Check every allocation and rate the file's health
    Scan {
        input: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::init_from_env(env_logger::Env::default().default_filter_or(level));

    let options = ParseOptions {
        max_depth:   cli.max_depth,
        max_records: cli.max_records,
        ..ParseOptions::default()
    };

    match cli.command {

        // ── Info ─────────────────────────────────────────────────────────────
        Commands::Info { input, json } => {
            let file = BlpFile::open_with_options(&input, options)?;
            if json {
                let info = serde_json::json!({
                    "header":         file.header(),
                    "preamble":       file.preamble(),
                    "package_header": file.package_header(),
                    "allocations":    file.allocations().len(),
                    "types":          file.registry().types.len(),
                    "enums":          file.registry().enums.len(),
                    "root_type_name": file.root_type_name(),
                });
                println!("{}", serde_json::to_string_pretty(&info)?);
                return Ok(());
            }

            let h = file.header();
            let p = file.preamble();
            println!("── CIVBLP Package ───────────────────────────────────────");
            println!("  Path            {}", input.display());
            println!("  Format version  {}", h.version);
            println!("  File size       {} B", h.file_size);
            println!("  Package         {} B at {:#x}", h.package_size, h.package_offset);
            println!("  Big data        {} entr(ies) at {:#x}", h.big_data_count, h.big_data_offset);
            println!("  Pointer size    {} B", p.pointer_size);
            println!("  Alignment       {}", p.alignment);
            println!("  Endian marker   {:#010x}", p.endian);
            println!("  Root type       {}", file.root_type_name().unwrap_or_else(|| "—".into()));
            println!("  Allocations     {}", file.allocations().len());
            println!("  Types / enums   {} / {}", file.registry().types.len(), file.registry().enums.len());
            println!("  Stripes:");
            for kind in StripeKind::ALL {
                let s = file.package_header().stripe(kind);
                println!("    {:<14} {:>10} B at {:#x}", kind.name(), s.size, s.offset);
            }
        }

        // ── List ─────────────────────────────────────────────────────────────
        Commands::List { input, type_name } => {
            let file = BlpFile::open_with_options(&input, options)?;
            println!("{:>7} {:<14} {:>10} {:>10} {:>7}  Type",
                     "Index", "Stripe", "Offset", "Size", "Count");
            let rows: Box<dyn Iterator<Item = &Allocation> + '_> = match type_name.as_deref() {
                Some(name) => Box::new(file.iter_entries_by_type(name)),
                None       => Box::new(file.allocations().iter()),
            };
            for alloc in rows {
                let stripe = alloc.stripe_kind().map_or("?", |k| k.name());
                println!("{:>7} {:<14} {:>10} {:>10} {:>7}  {}",
                    alloc.index, stripe, alloc.offset, alloc.size, alloc.element_count,
                    file.resolve_type_name(alloc).unwrap_or("—"));
            }
        }

        // ── Types ────────────────────────────────────────────────────────────
        Commands::Types { input, name, json } => {
            let file = BlpFile::open_with_options(&input, options)?;
            let registry = file.registry();
            match name {
                Some(name) => {
                    if let Some(ty) = registry.lookup_type(&name) {
                        if json {
                            println!("{}", serde_json::to_string_pretty(ty)?);
                        } else {
                            println!("{} (size {}, v{}, traits {:#x})",
                                ty.name, ty.size, ty.version, ty.trait_flags);
                            for f in &ty.fields {
                                println!("  +{:<6} {:<24} {:<32} {:?}",
                                    f.byte_offset, f.name, f.type_name, f.kind);
                            }
                        }
                    } else if let Some(e) = registry.lookup_enum(&name) {
                        if json {
                            println!("{}", serde_json::to_string_pretty(e)?);
                        } else {
                            println!("enum {} (v{})", e.name, e.version);
                            for c in &e.constants {
                                println!("  {:<32} = {}", c.name, c.value);
                            }
                        }
                    } else {
                        return Err(format!("Type not found: {name}").into());
                    }
                }
                None if json => {
                    println!("{}", serde_json::to_string_pretty(registry)?);
                }
                None => {
                    println!("{:<40} {:>8} {:>7}", "Type", "Size", "Fields");
                    for ty in registry.types.values() {
                        println!("{:<40} {:>8} {:>7}", ty.name, ty.size, ty.fields.len());
                    }
                    for e in registry.enums.values() {
                        println!("{:<40} {:>8} {:>7}", e.name, "enum", e.constants.len());
                    }
                }
            }
        }

        // ── Dump ─────────────────────────────────────────────────────────────
        Commands::Dump { input, index, type_name, limit } => {
            let file = BlpFile::open_with_options(&input, options)?;
            let targets: Vec<_> = match (index, type_name.as_deref()) {
                (Some(i), _) => {
                    let alloc = file.allocation(i)
                        .ok_or_else(|| format!("No allocation at index {i}"))?;
                    vec![alloc]
                }
                (None, Some(name)) => file.iter_entries_by_type(name).take(limit).collect(),
                (None, None) => {
                    let root = file.root_type_name()
                        .ok_or("No root type name; pass --index or --type-name")?;
                    file.iter_entries_by_type(&root).take(limit).collect()
                }
            };
            for alloc in targets {
                let record = file.deserialize_alloc(alloc);
                println!("// [{}] {}", alloc.index, record.type_name.as_deref().unwrap_or("—"));
                println!("{}", record.to_json()?);
            }
        }

        // ── Scan ─────────────────────────────────────────────────────────────
        Commands::Scan { input, json } => {
            let file = BlpFile::open_with_options(&input, options)?;
            let report = scan(&file);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
                return Ok(());
            }
            println!("{}", report.summary());
            for w in &report.warnings {
                println!("  warning: {w}");
            }
            for entry in report.damaged() {
                println!("  [{}] {:<32} {:?}",
                    entry.index,
                    entry.type_name.as_deref().unwrap_or("—"),
                    entry.health);
            }
        }
    }

    Ok(())
}
