// Care-Gap Dashboard - Admin CLI
// Database setup and bulk CSV import; the API server is a separate binary.

use anyhow::Result;
use rusqlite::Connection;
use std::env;
use std::path::Path;

use caredash::{get_gap_closures, insert_gap_closures, load_gap_closure_csv, setup_database};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("init") => run_init(args.get(2).map(String::as_str).unwrap_or("caredash.db")),
        Some("import") => {
            let Some(csv_path) = args.get(2) else {
                eprintln!("Usage: caredash import <csv> [db-path]");
                std::process::exit(1);
            };
            run_import(
                csv_path,
                args.get(3).map(String::as_str).unwrap_or("caredash.db"),
            )
        }
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn print_usage() {
    println!("caredash - care-gap dashboard admin CLI");
    println!();
    println!("Commands:");
    println!("  init [db-path]           Create the database schema (WAL mode)");
    println!("  import <csv> [db-path]   Bulk-load gap closure rows from CSV");
    println!();
    println!("The API server is the caredash-server binary.");
}

fn run_init(db_path: &str) -> Result<()> {
    println!("Setting up database at {}...", db_path);

    let conn = Connection::open(Path::new(db_path))?;
    setup_database(&conn)?;

    println!("✓ Database initialized with WAL mode");
    Ok(())
}

fn run_import(csv_path: &str, db_path: &str) -> Result<()> {
    println!("Loading CSV from {}...", csv_path);
    let entries = load_gap_closure_csv(Path::new(csv_path))?;
    println!("✓ Loaded {} gap closure entries", entries.len());

    let conn = Connection::open(Path::new(db_path))?;
    setup_database(&conn)?;

    let inserted = insert_gap_closures(&conn, &entries)?;
    println!("✓ Inserted: {} rows", inserted);

    let total = get_gap_closures(&conn)?.len();
    println!("✓ Database now contains {} gap closure rows", total);

    Ok(())
}
