use anyhow::{anyhow, Result};
use clap::Parser;
use dbfcomment::{
    config::CodePage,
    extract::{display_value, extract_fields},
    scan::{classify, read_catalog, DEFAULT_ALLOW_LIST},
};
use std::{collections::BTreeMap, path::PathBuf};

/// Print one table's field catalog and the first few records.
#[derive(Parser, Debug)]
struct Args {
    /// Path to a .dbf file
    file: PathBuf,

    /// Code page used to decode text fields
    #[arg(long, default_value = "cp1252")]
    encoding: String,

    /// How many records to print
    #[arg(long, default_value_t = 5)]
    limit: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let page = CodePage::lookup(&args.encoding, &BTreeMap::new())?;

    // 1) catalog, read-only
    let descriptor =
        read_catalog(&args.file, page.encoding).map_err(|e| anyhow!("{}: {}", args.file.display(), e))?;

    println!("=== Table: {} ({}) ===", args.file.display(), page.label());
    for field in &descriptor.fields {
        let marker = if field.is_target() { "*" } else { " " };
        println!(
            "{} {:<12} | {:<10} | {:>3}",
            marker,
            field.name,
            format!("{:?}", field.field_type),
            field.length
        );
    }
    println!();

    // 2) classification against the default allow-list
    let allow_list: Vec<String> = DEFAULT_ALLOW_LIST.iter().map(|s| s.to_string()).collect();
    match classify(&descriptor, &allow_list) {
        Some(m) => {
            let names: Vec<&str> = m.fields.iter().map(|f| f.name.as_str()).collect();
            let targets: Vec<&str> = m.target_fields().map(|f| f.name.as_str()).collect();
            println!(
                "translation target ({}); reported fields: {}",
                targets.join(", "),
                names.join(", ")
            );
        }
        None => println!("no COMMENT or _COMMENT field"),
    }
    println!();

    // 3) records
    let rows = extract_fields(&args.file, &descriptor.fields, page.encoding)?;
    println!("=== Records: {} ===", rows.len());
    for row in rows.iter().take(args.limit) {
        let cells: Vec<String> = row
            .values
            .iter()
            .map(|(name, value)| format!("{}={}", name, display_value(value)))
            .collect();
        println!("#{:<5} {}", row.index, cells.join(" | "));
    }

    Ok(())
}
