use daxql::config;
use daxql::scanner::{self, BindInput, DataChunk};
use std::io::{self, Write};
use tracing::info;

fn main() {
    // Initialize the logging system using tracing subscriber
    tracing_subscriber::fmt::init();

    info!("Starting daxql...");

    // Basic startup message
    println!("Welcome to daxql! Query Analysis Services cubes with DAX.");

    // Parse CLI arguments: a connection target, or the name of a config
    // profile, or nothing (prompt interactively)
    let args: Vec<String> = std::env::args().collect();
    let target = match args.get(1) {
        Some(arg) => match config::global().profile(arg) {
            Some(profile) => profile.target().to_connection_string(),
            None => arg.clone(),
        },
        None => prompt_for_target(),
    };

    println!("Using connection target: {}", target);
    query_loop(&target);
}

/// Prompts for server and database, falling back to defaults on empty input.
fn prompt_for_target() -> String {
    let server = prompt("Enter server name (default: localhost): ");
    let server = if server.is_empty() {
        "localhost".to_string()
    } else {
        server
    };

    let database = prompt("Enter database/cube name (default: none): ");
    format!("Server={};Database={}", server, database)
}

/// Reads DAX queries until `exit`/`quit`, running each through the scan
/// pipeline and printing the rows.
fn query_loop(target: &str) {
    loop {
        let query = prompt("\nEnter DAX query (or 'exit' to quit):\n");
        if query == "exit" || query == "quit" {
            break;
        }

        let query = if query.is_empty() {
            // Use a default query if none provided
            let default_query = "EVALUATE ROW(\"Example\", 123)".to_string();
            println!("Using default query: {}", default_query);
            default_query
        } else {
            query
        };

        if let Err(e) = run_query(target, &query) {
            eprintln!("Query failed: {}", e);
        }
    }
}

/// Binds, initializes and scans one query, printing results as they arrive.
fn run_query(target: &str, query: &str) -> daxql::core::Result<()> {
    let timeout = config::global().timeout_seconds();
    let mut bind_data = scanner::bind(&BindInput {
        target: target.to_string(),
        query: query.to_string(),
        timeout_seconds: timeout,
    })?;
    if let Some(batch_size) = config::global().batch_size() {
        bind_data.options.batch_size = batch_size;
    }

    println!("{}", bind_data.column_names().join("\t"));

    let mut state = scanner::init_scan(&bind_data)?;
    let mut chunk = DataChunk::new(bind_data.columns.len());
    let mut row_count = 0usize;

    loop {
        scanner::scan(&mut state, &mut chunk)?;
        if chunk.cardinality() == 0 {
            break;
        }
        for row in 0..chunk.cardinality() {
            let line: Vec<String> = (0..chunk.column_count())
                .map(|col| chunk.column(col)[row].to_string())
                .collect();
            println!("{}", line.join("\t"));
        }
        row_count += chunk.cardinality();
    }
    state.close();

    println!("\n{} row(s) returned.", row_count);
    Ok(())
}

/// Prints a prompt and reads one trimmed line from stdin.
fn prompt(message: &str) -> String {
    print!("{}", message);
    let _ = io::stdout().flush();
    let mut line = String::new();
    match io::stdin().read_line(&mut line) {
        Ok(0) | Err(_) => "exit".to_string(),
        Ok(_) => line.trim().to_string(),
    }
}
